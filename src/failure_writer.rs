//! 失败分块记录 - 线程安全的 JSONL 写入器
//!
//! 每个导入失败的分块写成一行 JSON，字段为 `index`、`path`、`error`，
//! 便于导入结束后手工补导。多个工作线程共享同一个写入器。

use serde_json::json;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 失败分块写入器
///
/// 每次写入后立即刷新，进程中途退出也不会丢失已经记录的失败信息。
pub struct FailureWriter {
    writer: Mutex<BufWriter<std::fs::File>>,
    path: PathBuf,
}

impl FailureWriter {
    /// 创建写入器，文件以追加方式打开
    ///
    /// # Errors
    /// 当无法创建或打开输出文件时返回错误
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self { writer: Mutex::new(BufWriter::new(file)), path })
    }

    /// 记录一个失败的分块，写入失败只记日志
    pub fn record(&self, index: usize, chunk_path: &Path, error: &str) {
        let line = json!({
            "index": index,
            "path": chunk_path.to_string_lossy(),
            "error": error,
        });

        match self.writer.lock() {
            Ok(mut writer) => {
                if writeln!(writer, "{line}").and_then(|()| writer.flush()).is_err()
                {
                    #[cfg(feature = "logging")]
                    tracing::error!(
                        "写入失败分块记录失败: {}",
                        self.path.display()
                    );
                }
            }
            Err(_) => {
                #[cfg(feature = "logging")]
                tracing::error!("获取失败分块写入器锁失败");
            }
        }
    }

    /// 获取记录文件路径
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
