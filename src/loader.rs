//! 导入流程编排
//!
//! 检查连接 → 确保数据库存在 → 修改服务端变量 → 切分 → 单线程导入 schema
//! → 并行导入数据 → 恢复服务端变量 → 清理临时目录。
//! 变量修改之后的任何错误都会先恢复变量再返回。

use crate::claim::{Claimer, FileClaimer};
use crate::client::DatabaseClient;
use crate::config::Config;
use crate::error::{LoadError, Result};
use crate::failure_writer::FailureWriter;
use crate::pool::{PoolReport, WorkerPool};
use crate::settings::{self, SettingChange, SettingsGuard, SettingsPolicy};
use crate::splitter::{self, ChunkSplitter, SplitResult};
use chrono::{DateTime, Local};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 导入流程所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    ConnectionChecked,
    DatabaseEnsured,
    SettingsApplied,
    Split,
    SchemaLoaded,
    DataLoaded,
    /// 变量修改之后出错，随后一定进入 `SettingsRestored`
    Error,
    SettingsRestored,
    Done,
}

/// 一次导入的汇总
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// 开始时间
    pub started_at: DateTime<Local>,
    /// 总耗时
    pub elapsed: Duration,
    /// 切分结果
    pub split: SplitResult,
    /// 数据导入结果
    pub pool: PoolReport,
    /// 导入期间修改过的变量
    pub settings_changed: Vec<SettingChange>,
    /// 恢复变量时的错误
    pub restore_error: Option<String>,
    /// 临时目录是否已删除
    pub work_dir_removed: bool,
}

impl LoadReport {
    /// 所有分块都导入成功并且变量恢复成功
    pub fn is_success(&self) -> bool {
        self.pool.is_success() && self.restore_error.is_none()
    }
}

/// 导入流程
pub struct Loader<C: DatabaseClient + 'static> {
    config: Config,
    client: Arc<C>,
    history: Vec<LoadPhase>,
    restore_error: Option<String>,
}

impl<C: DatabaseClient + 'static> Loader<C> {
    pub fn new(config: Config, client: Arc<C>) -> Self {
        Self { config, client, history: vec![LoadPhase::Idle], restore_error: None }
    }

    /// 当前阶段
    pub fn phase(&self) -> LoadPhase {
        self.history.last().copied().unwrap_or(LoadPhase::Idle)
    }

    /// 经过的所有阶段
    pub fn history(&self) -> &[LoadPhase] {
        &self.history
    }

    /// 最近一次运行中恢复服务端变量的错误
    ///
    /// `run` 返回错误时变量恢复的结果只能从这里取得。
    pub fn restore_error(&self) -> Option<&str> {
        self.restore_error.as_deref()
    }

    fn advance(&mut self, next: LoadPhase) {
        #[cfg(feature = "logging")]
        tracing::debug!("阶段 {:?} -> {:?}", self.phase(), next);
        self.history.push(next);
    }

    /// 执行完整的导入流程
    ///
    /// # Errors
    /// - 前置检查失败（输入文件不存在、连接失败、变量读取失败等），此时服务端未被修改
    /// - 切分或 schema 导入失败，此时变量已经恢复
    ///
    /// 数据分块失败不作为错误返回，而是体现在 [`LoadReport::is_success`] 中。
    pub fn run(&mut self) -> Result<LoadReport> {
        self.restore_error = None;
        let started_at = Local::now();
        let start = Instant::now();
        self.log_configuration();

        let dump_file = &self.config.load.dump_file;
        if !dump_file.is_file() {
            return Err(LoadError::InputNotFound(dump_file.clone()));
        }

        self.check_connection()?;
        self.advance(LoadPhase::ConnectionChecked);

        self.ensure_database()?;
        self.advance(LoadPhase::DatabaseEnsured);

        settings::check_risky_settings(self.client.as_ref())?;

        let client = Arc::clone(&self.client);
        let policy = SettingsPolicy::from(&self.config.load);
        let mut guard = SettingsGuard::apply(client.as_ref(), policy)?;
        let settings_changed = guard.changes().to_vec();
        self.advance(LoadPhase::SettingsApplied);

        let outcome = self.load_phases();
        if outcome.is_err() {
            self.advance(LoadPhase::Error);
        }

        let restore_error = guard.restore().err().map(|e| e.to_string());
        drop(guard);
        self.restore_error = restore_error.clone();
        self.advance(LoadPhase::SettingsRestored);
        self.advance(LoadPhase::Done);

        let elapsed = start.elapsed();
        let secs = elapsed.as_secs_f64();
        let minutes = (secs / 60.0).floor();
        #[cfg(feature = "logging")]
        tracing::info!(
            "------ 导入结束 (耗时 {} 分 {:.3} 秒) -----",
            minutes as u64,
            secs - minutes * 60.0
        );
        #[cfg(not(feature = "logging"))]
        let _ = minutes;

        let (split, pool, work_dir_removed) = match outcome {
            Ok(v) => v,
            Err(e) => {
                if let Some(msg) = &restore_error {
                    #[cfg(feature = "logging")]
                    tracing::error!("恢复服务端变量失败: {}", msg);
                    #[cfg(not(feature = "logging"))]
                    let _ = msg;
                }
                return Err(e);
            }
        };

        Ok(LoadReport {
            started_at,
            elapsed,
            split,
            pool,
            settings_changed,
            restore_error,
            work_dir_removed,
        })
    }

    /// 切分、导入 schema、导入数据、清理
    fn load_phases(&mut self) -> Result<(SplitResult, PoolReport, bool)> {
        let load = self.config.load.clone();
        let work_dir = self.config.work_dir();

        splitter::prepare_work_dir(&work_dir, self.config.min_free_space_bytes())?;
        let split = ChunkSplitter::new(load.lines_per_chunk, &work_dir)
            .split(&load.dump_file)?;
        self.advance(LoadPhase::Split);

        #[cfg(feature = "logging")]
        tracing::info!(
            "单线程导入 schema 文件 `{}` 到数据库 `{}`",
            split.schema_path.display(),
            load.database
        );
        self.client.run_script(Some(&load.database), &split.schema_path)?;
        self.advance(LoadPhase::SchemaLoaded);

        let mut pool = WorkerPool::new(
            Arc::clone(&self.client),
            load.parallel,
            load.delete_after_load,
        );
        if let Some(path) = self.config.failure_log_path() {
            pool = pool.with_failure_writer(Arc::new(FailureWriter::new(path)?));
        }
        let report = match self.config.claim_file_path() {
            Some(path) if load.parallel > 1 => {
                #[cfg(feature = "logging")]
                tracing::info!("通过计数器文件 {} 领取分块", path.display());
                let claimer: Arc<dyn Claimer> = Arc::new(FileClaimer::create(path)?);
                pool.run_parallel(&load.database, &split.chunk_paths, claimer)
            }
            _ => pool.run(&load.database, &split.chunk_paths),
        };
        self.advance(LoadPhase::DataLoaded);

        #[cfg(feature = "logging")]
        tracing::info!(
            "数据导入完成: 成功 {} 个分块, 失败 {} 个分块",
            report.loaded,
            report.failed.len()
        );

        let removed = if report.is_success() {
            fs::remove_dir_all(&work_dir)?;
            true
        } else {
            #[cfg(feature = "logging")]
            {
                for failure in &report.failed {
                    tracing::error!(
                        "分块 {} 导入失败: {} ({})",
                        failure.index,
                        failure.path.display(),
                        failure.error
                    );
                }
                tracing::warn!(
                    "存在导入失败的分块，保留临时目录 {}",
                    work_dir.display()
                );
            }
            false
        };
        Ok((split, report, removed))
    }

    fn check_connection(&self) -> Result<()> {
        #[cfg(feature = "logging")]
        tracing::info!("检查 mysql 连接 ...");
        self.client.query_text("show processlist;")?;
        #[cfg(feature = "logging")]
        tracing::info!("mysql 连接正常");
        Ok(())
    }

    fn ensure_database(&self) -> Result<()> {
        let database = &self.config.load.database;
        if database.trim().is_empty() {
            return Err(LoadError::config("请指定要导入的目标数据库"));
        }
        self.client.query_text(&format!(
            "CREATE DATABASE IF NOT EXISTS {}",
            quote_identifier(database)
        ))?;
        Ok(())
    }

    fn log_configuration(&self) {
        #[cfg(feature = "logging")]
        {
            let c = &self.config;
            tracing::info!("------- 导入配置 ----------------");
            tracing::info!("mysql 客户端:        {}", c.client.binary);
            tracing::info!("输入文件:            {}", c.load.dump_file.display());
            tracing::info!("临时目录:            {}", c.work_dir().display());
            tracing::info!("数据库:              {}", c.load.database);
            tracing::info!("socket:              {}", c.client.socket);
            tracing::info!("用户:                {}", c.client.user);
            tracing::info!(
                "密码:                {}",
                if c.client.password.is_empty() { "(未设置)" } else { "******" }
            );
            tracing::info!("主机:                {}:{}", c.client.host, c.client.port);
            tracing::info!("每个分块 INSERT 行数: {}", c.load.lines_per_chunk);
            tracing::info!("并行度:              {}", c.load.parallel);
            tracing::info!("fast mode:           {}", c.load.fast_mode);
            tracing::info!("导入后删除分块:      {}", c.load.delete_after_load);
            tracing::info!("-----------------------------");
        }
    }
}

/// 用反引号括起标识符，内部的反引号写两遍
fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
