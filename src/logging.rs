//! 日志初始化和配置模块
//!
//! 这个模块提供了统一的日志初始化功能，使用 tracing 库。
//! 默认配置：info 级别，输出到控制台，可选按天滚动写入日志目录。

use std::io;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// 日志配置结构体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: Level,
    /// 日志文件目录，None 表示只输出到控制台
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    /// 创建新的日志配置，使用默认级别
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// 设置日志文件目录
    pub fn log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// 从配置文件中的日志段构建
    ///
    /// `verbose` 为 true 时级别至少提升到 debug。
    pub fn from_settings(
        settings: &crate::config::LogConfig,
        verbose: bool,
    ) -> LogResult<Self> {
        let mut level: Level = settings.level.parse().map_err(|_| {
            LogError::Config(format!("无效的日志级别: {}", settings.level))
        })?;
        if verbose && level < Level::DEBUG {
            level = Level::DEBUG;
        }
        let log_dir = if settings.enable_file && !settings.log_dir.is_empty()
        {
            Some(PathBuf::from(&settings.log_dir))
        } else {
            None
        };
        Ok(Self { level, log_dir })
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO, log_dir: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
    #[error("日志配置错误: {0}")]
    Config(String),
    #[error("日志初始化错误: {0}")]
    Init(String),
}

/// 日志初始化结果
pub type LogResult<T> = Result<T, LogError>;

/// 初始化日志系统
///
/// - 控制台输出，带线程名（工作线程名为 `load-worker-<id>`）
/// - 配置了日志目录时，额外按天滚动写入 `pload.<日期>` 文件
/// - `RUST_LOG` 环境变量优先于配置的级别
///
/// 返回文件写入线程的 guard，调用方需要持有它直到程序退出，
/// 否则缓冲中的日志会丢失。重复初始化不视为错误。
///
/// # Examples
///
/// ```no_run
/// use mysql_pload::logging::{init_logging, LogConfig};
/// use tracing::Level;
///
/// let _guard = init_logging(LogConfig::new().level(Level::DEBUG)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> LogResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let console_layer = fmt::layer()
        .with_timer(SystemTime)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(true);

    let (file_layer, guard) = match config.log_dir.as_ref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "pload");
            let (non_blocking, guard) =
                tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_timer(SystemTime)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    match subscriber.try_init() {
        Ok(()) => {
            tracing::debug!(
                "日志系统初始化完成 - 级别: {}, 日志目录: {:?}",
                config.level,
                config.log_dir
            );
            Ok(guard)
        }
        // 已经初始化过了，这不是错误
        Err(_) => Ok(None),
    }
}
