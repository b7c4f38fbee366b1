//! 基于文件锁的跨进程互斥
//!
//! 对锁文件加操作系统级排他锁 (`fs2`) 表示持有，关闭文件即释放，
//! 持有者进程崩溃时锁由系统自动释放，残留的锁文件不会阻塞后续获取。
//! 获取时带超时，超过时限直接返回错误而不是无限等待。

use crate::error::{LoadError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// 默认获取超时 5 分钟
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 5);

/// 超时上限 2 小时，超时为 0 时同样使用该值
pub const HARD_TIMEOUT: Duration = Duration::from_secs(60 * 120);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 文件锁，drop 时释放
#[derive(Debug)]
pub struct FileLease {
    path: PathBuf,
    file: File,
}

impl FileLease {
    /// 使用默认超时获取锁
    pub fn acquire_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::acquire(path, DEFAULT_TIMEOUT)
    }

    /// 获取锁，最多等待 `timeout`
    pub fn acquire<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let timeout = effective_timeout(timeout);
        let start = Instant::now();
        loop {
            if let Some(lease) = Self::try_acquire(path)? {
                return Ok(lease);
            }
            let waited = start.elapsed();
            if waited >= timeout {
                #[cfg(feature = "logging")]
                tracing::error!(
                    "文件锁 {} 获取超时，已等待 {:.2?}",
                    path.display(),
                    waited
                );
                return Err(LoadError::Lease {
                    path: path.to_path_buf(),
                    waited_secs: waited.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }

    /// 尝试获取一次，锁被占用时返回 `Ok(None)`
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                // 写入持有者 pid 方便排查
                file.set_len(0)?;
                file.rewind()?;
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(Self { path: path.to_path_buf(), file }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        // 锁文件保留在原处，删除它会让等待者锁住一个已经脱离目录的文件
        if let Err(e) = FileExt::unlock(&self.file) {
            #[cfg(feature = "logging")]
            tracing::warn!("释放文件锁 {} 失败: {}", self.path.display(), e);
            #[cfg(not(feature = "logging"))]
            let _ = e;
        }
    }
}

fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() || timeout > HARD_TIMEOUT {
        HARD_TIMEOUT
    } else {
        timeout
    }
}
