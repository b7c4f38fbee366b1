//! 数据分块并行导入
//!
//! 固定数量的工作线程通过 [`Claimer`] 领取分块序号，各自调用外部客户端导入，
//! 直到领到的序号越界为止。单个分块失败只记录，不会中断工作线程。
//! 并行度不大于 1 时在调用线程中按序号顺序导入，不创建任何线程。

use crate::claim::{AtomicClaimer, Claimer};
use crate::client::DatabaseClient;
use crate::error::{LoadError, Result};
use crate::failure_writer::FailureWriter;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// 导入失败的分块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// 分块序号
    pub index: usize,
    /// 分块文件
    pub path: PathBuf,
    /// 错误信息
    pub error: String,
}

/// 单个工作线程的退出状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// 正常退出（领到越界序号）
    Finished { worker: usize, loaded: usize, failed: usize },
    /// 循环中有错误逃逸，或者线程 panic
    Failed { worker: usize, message: String },
}

impl WorkerOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WorkerOutcome::Finished { .. })
    }
}

/// 导入汇总
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    /// 每个工作线程的退出状态，顺序导入时为空
    pub workers: Vec<WorkerOutcome>,
    /// 成功导入的分块数
    pub loaded: usize,
    /// 失败的分块，按序号排序
    pub failed: Vec<ChunkFailure>,
    /// 是否走的顺序导入
    pub sequential: bool,
}

impl PoolReport {
    /// 所有工作线程都正常退出
    ///
    /// 只看线程退出状态，不看分块结果。
    pub fn workers_succeeded(&self) -> bool {
        self.workers.iter().all(WorkerOutcome::is_ok)
    }

    /// 所有工作线程正常退出，并且没有失败的分块
    pub fn is_success(&self) -> bool {
        self.workers_succeeded() && self.failed.is_empty()
    }

    /// 尝试过的分块数
    pub fn attempted(&self) -> usize {
        self.loaded + self.failed.len()
    }
}

/// 工作线程池
pub struct WorkerPool<C: DatabaseClient + 'static> {
    client: Arc<C>,
    parallel: usize,
    delete_after_load: bool,
    failure_writer: Option<Arc<FailureWriter>>,
}

impl<C: DatabaseClient + 'static> WorkerPool<C> {
    pub fn new(client: Arc<C>, parallel: usize, delete_after_load: bool) -> Self {
        Self { client, parallel, delete_after_load, failure_writer: None }
    }

    /// 把失败分块写入 JSONL 文件
    pub fn with_failure_writer(mut self, writer: Arc<FailureWriter>) -> Self {
        self.failure_writer = Some(writer);
        self
    }

    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// 导入所有分块，并行度不大于 1 时顺序导入
    pub fn run(&self, database: &str, chunks: &[PathBuf]) -> PoolReport {
        if self.parallel <= 1 {
            #[cfg(feature = "logging")]
            tracing::info!("单线程导入数据文件到数据库 `{}`", database);
            self.run_sequential(database, chunks)
        } else {
            #[cfg(feature = "logging")]
            tracing::info!(
                "并行导入数据文件到数据库 `{}` (parallel={})",
                database,
                self.parallel
            );
            self.run_parallel(database, chunks, Arc::new(AtomicClaimer::new()))
        }
    }

    /// 在调用线程中按序号顺序导入
    pub fn run_sequential(&self, database: &str, chunks: &[PathBuf]) -> PoolReport {
        let mut report = PoolReport { sequential: true, ..PoolReport::default() };
        let total = chunks.len();
        for (index, path) in chunks.iter().enumerate() {
            let job = ChunkJob { index, total, path, worker: None };
            match job.execute(self.client.as_ref(), database, self.delete_after_load)
            {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    let failure = self.record_failure(&job, &e);
                    report.failed.push(failure);
                }
            }
        }
        report
    }

    /// 使用给定的领取器并行导入
    ///
    /// 工作线程数为 `min(parallel, 分块数)`。所有线程结束后才汇总结果。
    pub fn run_parallel(
        &self,
        database: &str,
        chunks: &[PathBuf],
        claimer: Arc<dyn Claimer>,
    ) -> PoolReport {
        let chunks: Arc<[PathBuf]> = Arc::from(chunks);
        let failures: Arc<Mutex<Vec<ChunkFailure>>> =
            Arc::new(Mutex::new(Vec::new()));
        let loaded = Arc::new(AtomicUsize::new(0));
        let workers = self.parallel.max(1).min(chunks.len());

        #[cfg(feature = "logging")]
        tracing::debug!("启动 {} 个导入线程，共 {} 个分块", workers, chunks.len());

        let mut handles = Vec::with_capacity(workers);
        let mut outcomes = Vec::with_capacity(workers);
        for worker in 0..workers {
            let ctx = WorkerContext {
                worker,
                client: Arc::clone(&self.client),
                database: database.to_string(),
                chunks: Arc::clone(&chunks),
                claimer: Arc::clone(&claimer),
                failures: Arc::clone(&failures),
                loaded: Arc::clone(&loaded),
                failure_writer: self.failure_writer.clone(),
                delete_after_load: self.delete_after_load,
            };
            let spawned = thread::Builder::new()
                .name(format!("load-worker-{worker}"))
                .spawn(move || ctx.run());
            match spawned {
                Ok(handle) => handles.push((worker, handle)),
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::error!("启动导入线程 {} 失败: {}", worker, e);
                    outcomes.push(WorkerOutcome::Failed {
                        worker,
                        message: e.to_string(),
                    });
                }
            }
        }

        for (worker, handle) in handles {
            let outcome = match handle.join() {
                Ok(Ok(stats)) => WorkerOutcome::Finished {
                    worker,
                    loaded: stats.loaded,
                    failed: stats.failed,
                },
                Ok(Err(e)) => WorkerOutcome::Failed { worker, message: e.to_string() },
                Err(panic) => WorkerOutcome::Failed {
                    worker,
                    message: panic_message(panic.as_ref()),
                },
            };
            if let WorkerOutcome::Failed { message, .. } = &outcome {
                #[cfg(feature = "logging")]
                tracing::error!("[task {}] 异常退出: {}", worker, message);
                #[cfg(not(feature = "logging"))]
                let _ = message;
            }
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| match o {
            WorkerOutcome::Finished { worker, .. }
            | WorkerOutcome::Failed { worker, .. } => *worker,
        });

        let mut failed = match Arc::try_unwrap(failures) {
            Ok(m) => m.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => shared.lock().map(|g| g.clone()).unwrap_or_default(),
        };
        failed.sort_by_key(|f| f.index);

        // 异常退出的线程之前导入成功的分块也要计入
        let loaded = loaded.load(Ordering::SeqCst);

        let report = PoolReport { workers: outcomes, loaded, failed, sequential: false };
        #[cfg(feature = "logging")]
        {
            if !report.workers_succeeded() {
                tracing::error!("导入线程异常退出，数据可能不完整");
            }
        }
        report
    }

    fn record_failure(&self, job: &ChunkJob<'_>, error: &LoadError) -> ChunkFailure {
        record_failure(self.failure_writer.as_deref(), job, error)
    }
}

/// 单个分块的执行
struct ChunkJob<'a> {
    index: usize,
    total: usize,
    path: &'a Path,
    worker: Option<usize>,
}

impl ChunkJob<'_> {
    fn execute<C: DatabaseClient + ?Sized>(
        &self,
        client: &C,
        database: &str,
        delete_after_load: bool,
    ) -> Result<()> {
        let worker = self.worker.unwrap_or(0);
        #[cfg(feature = "logging")]
        tracing::info!(
            "[task {}] ({}/{}) 导入文件 `{}`",
            worker,
            self.index,
            self.total,
            self.path.display()
        );

        client.run_script(Some(database), self.path)?;

        if delete_after_load {
            #[cfg(feature = "logging")]
            tracing::debug!(
                "[task {}] ({}/{}) 文件已导入，删除: {}",
                worker,
                self.index,
                self.total,
                self.path.display()
            );
            if let Err(e) = fs::remove_file(self.path) {
                #[cfg(feature = "logging")]
                tracing::warn!("删除分块文件 {} 失败: {}", self.path.display(), e);
                #[cfg(not(feature = "logging"))]
                let _ = e;
            }
        }
        #[cfg(not(feature = "logging"))]
        let _ = worker;
        Ok(())
    }
}

fn record_failure(
    writer: Option<&FailureWriter>,
    job: &ChunkJob<'_>,
    error: &LoadError,
) -> ChunkFailure {
    #[cfg(feature = "logging")]
    tracing::error!(
        "[task {}] 导入分块 {} 出错: {}",
        job.worker.unwrap_or(0),
        job.index,
        error
    );
    let message = error.to_string();
    if let Some(w) = writer {
        w.record(job.index, job.path, &message);
    }
    ChunkFailure { index: job.index, path: job.path.to_path_buf(), error: message }
}

#[derive(Debug, Default)]
struct WorkerStats {
    loaded: usize,
    failed: usize,
}

struct WorkerContext<C: DatabaseClient + 'static> {
    worker: usize,
    client: Arc<C>,
    database: String,
    chunks: Arc<[PathBuf]>,
    claimer: Arc<dyn Claimer>,
    failures: Arc<Mutex<Vec<ChunkFailure>>>,
    loaded: Arc<AtomicUsize>,
    failure_writer: Option<Arc<FailureWriter>>,
    delete_after_load: bool,
}

impl<C: DatabaseClient + 'static> WorkerContext<C> {
    fn run(self) -> Result<WorkerStats> {
        let total = self.chunks.len();
        let mut stats = WorkerStats::default();
        #[cfg(feature = "logging")]
        tracing::debug!("[task {}] 导入线程启动", self.worker);

        loop {
            let index = self.claimer.claim()?;
            if index >= total {
                break;
            }
            let job = ChunkJob {
                index,
                total,
                path: &self.chunks[index],
                worker: Some(self.worker),
            };
            match job.execute(self.client.as_ref(), &self.database, self.delete_after_load)
            {
                Ok(()) => {
                    stats.loaded += 1;
                    self.loaded.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    stats.failed += 1;
                    let failure =
                        record_failure(self.failure_writer.as_deref(), &job, &e);
                    self.failures
                        .lock()
                        .map_err(|_| LoadError::Worker {
                            worker: self.worker,
                            message: "失败列表锁已中毒".to_string(),
                        })?
                        .push(failure);
                }
            }
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            "[task {}] 导入线程结束: 成功 {} 个, 失败 {} 个",
            self.worker,
            stats.loaded,
            stats.failed
        );
        Ok(stats)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "线程 panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_flags() {
        let mut report = PoolReport {
            workers: vec![
                WorkerOutcome::Finished { worker: 0, loaded: 2, failed: 1 },
                WorkerOutcome::Finished { worker: 1, loaded: 3, failed: 0 },
            ],
            loaded: 5,
            failed: vec![ChunkFailure {
                index: 4,
                path: PathBuf::from("f_data_4.sql"),
                error: "boom".to_string(),
            }],
            sequential: false,
        };
        assert!(report.workers_succeeded());
        assert!(!report.is_success());
        assert_eq!(report.attempted(), 6);

        report.failed.clear();
        assert!(report.is_success());

        report.workers.push(WorkerOutcome::Failed {
            worker: 2,
            message: "panic".to_string(),
        });
        assert!(!report.workers_succeeded());
    }

    #[test]
    fn test_panic_message() {
        let p: Box<dyn std::any::Any + Send> = Box::new("oops");
        assert_eq!(panic_message(p.as_ref()), "oops");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(p.as_ref()), "线程 panic");
    }
}
