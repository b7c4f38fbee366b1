//! 错误类型定义
//!
//! 这个模块定义了库中使用的所有错误类型，使用 thiserror 提供丰富的错误信息。

use std::path::PathBuf;

/// 导入流程的结果类型
pub type Result<T> = std::result::Result<T, LoadError>;

/// 导入流程错误类型
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// 输入文件不存在
    #[error("输入文件不存在: {}", .0.display())]
    InputNotFound(PathBuf),

    /// dump 文件中包含建库/切换库语句
    #[error(
        "不支持在源文件中创建或切换数据库 (行{line}): {content}；请保证整个文件只属于一个数据库后重试"
    )]
    MultiDatabase { line: usize, content: String },

    /// 临时目录剩余空间不足
    #[error(
        "临时目录 {} 可用空间不足: 剩余 {available} 字节，至少需要 {required} 字节，请指定其他临时目录",
        .path.display()
    )]
    InsufficientSpace { path: PathBuf, available: u64, required: u64 },

    /// 外部命令执行失败
    #[error("命令执行失败 (退出码 {status:?}): {command}, stdout: {stdout}, stderr: {stderr}")]
    Command {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// 服务端变量读取或解析失败
    #[error("服务端变量 {name} 读取失败: {message}")]
    Setting { name: String, message: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 配置文件解析错误
    #[error("配置文件解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    /// 配置文件序列化错误
    #[error("配置文件序列化错误: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// 文件锁获取失败
    #[error("文件锁 {} 获取超时 ({waited_secs} 秒)", .path.display())]
    Lease { path: PathBuf, waited_secs: u64 },

    /// 工作线程异常退出
    #[error("工作线程 {worker} 异常退出: {message}")]
    Worker { worker: usize, message: String },

    /// 日志错误（仅在启用 logging feature 时可用）
    #[cfg(feature = "logging")]
    #[error("日志错误: {0}")]
    Log(#[from] crate::logging::LogError),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

impl LoadError {
    /// 创建一个配置错误
    pub fn config<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        #[cfg(feature = "logging")]
        tracing::error!("配置错误: {}", message);
        Self::Config(message)
    }

    /// 创建一个服务端变量错误
    pub fn setting<N: Into<String>, S: Into<String>>(
        name: N,
        message: S,
    ) -> Self {
        let name = name.into();
        let message = message.into();
        #[cfg(feature = "logging")]
        tracing::error!("服务端变量 {} 读取失败: {}", name, message);
        Self::Setting { name, message }
    }

    /// 创建一个多数据库错误
    pub fn multi_database(line: usize, content: String) -> Self {
        #[cfg(feature = "logging")]
        {
            tracing::error!("源文件第{}行包含建库/切库语句: {}", line, content);
            tracing::error!("请保证整个源文件只属于一个数据库后重试");
        }
        Self::MultiDatabase { line, content }
    }

    /// 创建一个其他类型错误
    pub fn other<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        #[cfg(feature = "logging")]
        tracing::error!("未知错误: {}", message);
        Self::Other(message)
    }

    /// 检查是否为 IO 错误
    pub fn is_io_error(&self) -> bool {
        matches!(self, LoadError::Io(_))
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            LoadError::Config(_) | LoadError::Toml(_) | LoadError::TomlSer(_)
        )
    }

    /// 检查是否为外部命令错误
    pub fn is_command_error(&self) -> bool {
        matches!(self, LoadError::Command { .. })
    }

    /// 是否属于前置条件失败（发生在修改服务端状态之前）
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LoadError::InputNotFound(_)
                | LoadError::MultiDatabase { .. }
                | LoadError::InsufficientSpace { .. }
                | LoadError::Setting { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_creation() {
        let config_err = LoadError::config("database missing");
        assert!(config_err.is_config_error());
        assert!(!config_err.is_io_error());

        let setting_err = LoadError::setting("autocommit", "empty output");
        assert!(setting_err.is_precondition());

        let other = LoadError::other("boom");
        assert!(!other.is_precondition());
    }

    #[test]
    fn test_error_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: LoadError = io_err.into();
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_display() {
        let err = LoadError::MultiDatabase {
            line: 42,
            content: "USE shop;".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("42"));
        assert!(display.contains("USE shop;"));

        let err = LoadError::Command {
            command: "mysql -e 'select 1'".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "access denied".to_string(),
        };
        assert!(err.is_command_error());
        assert!(err.to_string().contains("access denied"));
    }
}
