//! 配置管理模块
//!
//! 提供统一的配置文件读取和管理功能。所有字段都有默认值，
//! 配置文件中只需要写出需要修改的部分，命令行参数再覆盖配置文件。

use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 并行度上限
pub const MAX_PARALLEL: usize = 1024;

/// 分块目录名，位于 `tmp_dir` 之下
pub const WORK_DIR_NAME: &str = "this_is_temp_dir_for_chunks";

/// 主配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// mysql 客户端与连接配置
    pub client: ClientConfig,
    /// 导入配置
    pub load: LoadConfig,
    /// 日志配置
    pub log: LogConfig,
}

/// mysql 客户端与连接配置
///
/// socket 非空时优先使用 socket 连接，否则使用 host + port。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// mysql 可执行文件路径
    pub binary: String,
    /// unix socket 路径
    pub socket: String,
    /// 主机地址
    pub host: String,
    /// 端口号
    pub port: u16,
    /// 用户名
    pub user: String,
    /// 密码，空字符串表示不传 -p
    pub password: String,
}

/// 导入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// mysqldump 输出文件
    pub dump_file: PathBuf,
    /// 目标数据库
    pub database: String,
    /// 每个分块文件包含的 INSERT 行数
    pub lines_per_chunk: usize,
    /// 并行导入的工作线程数，范围 [1, 1024]
    pub parallel: usize,
    /// 存放分块文件的临时目录
    pub tmp_dir: PathBuf,
    /// 分块导入成功后删除分块文件
    pub delete_after_load: bool,
    /// 关闭 unique_checks 并设置 innodb_flush_log_at_trx_commit = 0
    pub fast_mode: bool,
    /// 导入期间关闭 foreign_key_checks
    pub disable_foreign_key_checks: bool,
    /// 导入期间打开 autocommit，避免大事务
    pub enable_autocommit: bool,
    /// 临时目录至少需要的剩余空间 (GB)，0 表示不检查
    pub min_free_space_gb: u64,
    /// 失败分块记录文件 (JSONL)，空表示不记录
    pub failure_log: String,
    /// 分块序号计数器文件，非空时通过文件锁领取序号，
    /// 可与其它进程共同消费同一批分块；空表示使用进程内计数器
    pub claim_file: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别 (trace, debug, info, warn, error)
    pub level: String,
    /// 日志输出目录
    pub log_dir: String,
    /// 是否写入日志文件
    pub enable_file: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            binary: "/usr/local/bin/mysql".to_string(),
            socket: String::new(),
            host: "localhost".to_string(),
            port: 8250,
            user: "root".to_string(),
            password: String::new(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            dump_file: PathBuf::from("out.sql"),
            database: String::new(),
            lines_per_chunk: 16,
            parallel: 8,
            tmp_dir: PathBuf::from("/tmp"),
            delete_after_load: true,
            fast_mode: true,
            disable_foreign_key_checks: true,
            enable_autocommit: true,
            min_free_space_gb: 2,
            failure_log: String::new(),
            claim_file: String::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: "logs".to_string(),
            enable_file: false,
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// 从字符串加载配置
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 把越界的数值收敛到合法范围
    ///
    /// `lines_per_chunk` 至少为 1，`parallel` 限制在 [1, 1024]。
    pub fn normalize(&mut self) {
        self.load.lines_per_chunk = self.load.lines_per_chunk.max(1);
        self.load.parallel = self.load.parallel.clamp(1, MAX_PARALLEL);
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        match self.log.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(LoadError::config(format!(
                    "无效的日志级别: {}",
                    self.log.level
                )));
            }
        }

        if self.load.database.trim().is_empty() {
            return Err(LoadError::config("请指定要导入的目标数据库"));
        }

        if self.load.database.contains('`') {
            return Err(LoadError::config(format!(
                "数据库名不能包含反引号: {}",
                self.load.database
            )));
        }

        if self.client.binary.trim().is_empty() {
            return Err(LoadError::config("mysql 客户端路径不能为空"));
        }

        Ok(())
    }

    /// 分块工作目录
    pub fn work_dir(&self) -> PathBuf {
        self.load.tmp_dir.join(WORK_DIR_NAME)
    }

    /// 临时目录至少需要的剩余字节数
    pub fn min_free_space_bytes(&self) -> u64 {
        self.load.min_free_space_gb.saturating_mul(1024 * 1024 * 1024)
    }

    /// 失败分块记录文件
    pub fn failure_log_path(&self) -> Option<PathBuf> {
        if self.load.failure_log.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.load.failure_log))
        }
    }

    /// 跨进程共享的分块序号计数器文件
    pub fn claim_file_path(&self) -> Option<PathBuf> {
        if self.load.claim_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.load.claim_file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        // 默认配置没有数据库
        assert!(config.validate().is_err());

        config.load.database = "shop".to_string();
        assert!(config.validate().is_ok());

        config.log.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_with_backtick_rejected() {
        let mut config = Config::default();
        config.load.database = "sh`op".to_string();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_claim_file_path() {
        let mut config = Config::default();
        assert!(config.claim_file_path().is_none());
        config.load.claim_file = "/shared/claim.counter".to_string();
        assert_eq!(
            config.claim_file_path(),
            Some(PathBuf::from("/shared/claim.counter"))
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.log.level, parsed_config.log.level);
        assert_eq!(config.client, parsed_config.client);
    }

    #[test]
    fn test_normalize_clamps() {
        let mut config = Config::from_str(
            "[load]\nlines_per_chunk = 0\nparallel = 5000\n",
        )
        .unwrap();
        assert_eq!(config.load.lines_per_chunk, 1);
        assert_eq!(config.load.parallel, MAX_PARALLEL);

        config.load.parallel = 0;
        config.normalize();
        assert_eq!(config.load.parallel, 1);
    }
}
