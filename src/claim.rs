//! 分块序号领取
//!
//! 多个工作者通过共享计数器领取下一个待导入的分块序号：
//! 每次领取返回递增前的值，从 0 开始，不重复、不跳号。

use crate::error::{LoadError, Result};
use crate::lease::{self, FileLease};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 领取下一个分块序号
pub trait Claimer: Send + Sync {
    fn claim(&self) -> Result<usize>;
}

/// 进程内原子计数器
#[derive(Debug, Default)]
pub struct AtomicClaimer {
    next: AtomicUsize,
}

impl AtomicClaimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已经发出的序号个数（包含越界的领取）
    pub fn issued(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl Claimer for AtomicClaimer {
    fn claim(&self) -> Result<usize> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// 基于文件的计数器，可在多个进程之间共享
///
/// 计数值以十进制文本保存在 `counter_path`，读改写过程由
/// `<counter_path>.lock` 文件锁保护。
#[derive(Debug, Clone)]
pub struct FileClaimer {
    counter_path: PathBuf,
    lock_path: PathBuf,
    timeout: Duration,
}

impl FileClaimer {
    /// 新建计数器文件并置 0，已存在时覆盖
    pub fn create<P: AsRef<Path>>(counter_path: P) -> Result<Self> {
        let claimer = Self::open(counter_path);
        fs::write(&claimer.counter_path, "0")?;
        Ok(claimer)
    }

    /// 打开其他进程创建的计数器
    pub fn open<P: AsRef<Path>>(counter_path: P) -> Self {
        let counter_path = counter_path.as_ref().to_path_buf();
        let mut lock_name = counter_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            counter_path,
            lock_path: PathBuf::from(lock_name),
            timeout: lease::DEFAULT_TIMEOUT,
        }
    }

    /// 设置文件锁获取超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn counter_path(&self) -> &Path {
        &self.counter_path
    }
}

impl Claimer for FileClaimer {
    fn claim(&self) -> Result<usize> {
        let _lease = FileLease::acquire(&self.lock_path, self.timeout)?;
        let content = match fs::read_to_string(&self.counter_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let trimmed = content.trim();
        let current = if trimmed.is_empty() {
            0
        } else {
            trimmed.parse::<usize>().map_err(|e| {
                LoadError::other(format!(
                    "计数器文件 {} 内容无效 ({trimmed}): {e}",
                    self.counter_path.display()
                ))
            })?
        };
        fs::write(&self.counter_path, (current + 1).to_string())?;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::tempdir;

    fn claim_concurrently<C: Claimer + 'static>(
        claimer: Arc<C>,
        threads: usize,
        per_thread: usize,
    ) -> Vec<usize> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let claimer = Arc::clone(&claimer);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        let v = claimer.claim().unwrap();
                        seen.lock().unwrap().push(v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut values = seen.lock().unwrap().clone();
        values.sort_unstable();
        values
    }

    #[test]
    fn test_atomic_claimer_sequence() {
        let claimer = AtomicClaimer::new();
        assert_eq!(claimer.claim().unwrap(), 0);
        assert_eq!(claimer.claim().unwrap(), 1);
        assert_eq!(claimer.claim().unwrap(), 2);
        assert_eq!(claimer.issued(), 3);
    }

    #[test]
    fn test_atomic_claimer_concurrent_no_duplicates() {
        let values = claim_concurrently(Arc::new(AtomicClaimer::new()), 8, 500);
        let expected: Vec<usize> = (0..4000).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_file_claimer_concurrent_no_duplicates() {
        let dir = tempdir().unwrap();
        let claimer = FileClaimer::create(dir.path().join("claim.counter"))
            .unwrap()
            .with_timeout(Duration::from_secs(30));
        let values = claim_concurrently(Arc::new(claimer), 4, 25);
        let unique: HashSet<_> = values.iter().copied().collect();
        assert_eq!(unique.len(), 100);
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_file_claimer_shared_between_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claim.counter");
        let first = FileClaimer::create(&path).unwrap();
        let second = FileClaimer::open(&path);
        assert_eq!(first.claim().unwrap(), 0);
        assert_eq!(second.claim().unwrap(), 1);
        assert_eq!(first.claim().unwrap(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "3");
    }

    #[test]
    fn test_file_claimer_ignores_leftover_lock_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claim.counter");
        let claimer = FileClaimer::create(&path)
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        fs::write(dir.path().join("claim.counter.lock"), "4242\n").unwrap();
        assert_eq!(claimer.claim().unwrap(), 0);
        assert_eq!(claimer.claim().unwrap(), 1);
    }

    #[test]
    fn test_file_claimer_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claim.counter");
        fs::write(&path, "not-a-number").unwrap();
        assert!(FileClaimer::open(&path).claim().is_err());
    }
}
