//! mysqldump 结果文件的分块并行导入
//!
//! 把一个大的 dump 文件切成 schema 文件和若干数据分块，先单线程导入 schema，
//! 再由固定数量的工作线程并行导入数据分块。导入期间临时放宽服务端的
//! 一致性/持久化设置，结束后保证恢复。

// 核心模块 - 始终可用
pub mod claim;
pub mod client;
pub mod config;
pub mod error;
pub mod failure_writer;
pub mod lease;
pub mod loader;
pub mod pool;
pub mod settings;
pub mod splitter;

// 日志模块 - 需要 logging 功能
#[cfg(feature = "logging")]
pub mod logging;

pub use client::{DatabaseClient, MysqlClient};
pub use config::Config;
pub use error::{LoadError, Result};
pub use loader::{LoadPhase, LoadReport, Loader};
pub use pool::{PoolReport, WorkerPool};
pub use settings::{SettingsGuard, SettingsPolicy};
pub use splitter::{ChunkSplitter, SplitResult};
