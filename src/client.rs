//! 数据库客户端抽象
//!
//! 导入流程只需要两种能力：执行一个 SQL 文件，以及执行一条语句并拿到文本输出。
//! [`MysqlClient`] 通过调用 mysql 命令行客户端实现这两种能力。

use crate::config::ClientConfig;
use crate::error::{LoadError, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// 数据库客户端的统一接口
pub trait DatabaseClient: Send + Sync {
    /// 在指定数据库中执行一个 SQL 文件，退出码非 0 时返回错误
    fn run_script(&self, database: Option<&str>, path: &Path) -> Result<()>;

    /// 执行一条语句并返回文本输出
    fn query_text(&self, sql: &str) -> Result<String>;
}

/// 基于 mysql 命令行的客户端
#[derive(Debug, Clone)]
pub struct MysqlClient {
    config: ClientConfig,
}

impl MysqlClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// 连接参数，socket 优先
    pub fn connection_args(&self) -> Vec<String> {
        let c = &self.config;
        let mut args = vec![format!("-u{}", c.user)];
        if !c.socket.is_empty() {
            args.push("--socket".to_string());
            args.push(c.socket.clone());
        } else {
            if !c.password.is_empty() {
                args.push(format!("-p{}", c.password));
            }
            args.push("--host".to_string());
            args.push(c.host.clone());
            args.push("--port".to_string());
            args.push(c.port.to_string());
        }
        args
    }

    /// 用于展示的命令行，密码会被遮盖
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.config.binary.clone()];
        for arg in self.connection_args() {
            if arg.starts_with("-p") && !arg.starts_with("--") {
                parts.push("-p******".to_string());
            } else {
                parts.push(arg);
            }
        }
        parts.join(" ")
    }

    fn execute(&self, database: Option<&str>, statement: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.connection_args());
        if let Some(db) = database {
            cmd.arg(db);
        }
        cmd.arg("-e").arg(statement);
        cmd.stdin(Stdio::null());

        let shown = format!(
            "{}{} -e \"{}\"",
            self.display_command(),
            database.map(|db| format!(" {db}")).unwrap_or_default(),
            statement
        );

        #[cfg(feature = "logging")]
        tracing::trace!("执行命令: {}", shown);

        let output = cmd.output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(LoadError::Command {
                command: shown,
                status: output.status.code(),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}

impl DatabaseClient for MysqlClient {
    fn run_script(&self, database: Option<&str>, path: &Path) -> Result<()> {
        self.execute(database, &format!("source {}", path.display()))?;
        Ok(())
    }

    fn query_text(&self, sql: &str) -> Result<String> {
        self.execute(None, sql)
    }
}
