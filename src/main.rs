use anyhow::{Context, Result};
use clap::Parser;
use mysql_pload::{Config, LoadError, Loader, MysqlClient};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_ERROR: u8 = 1;
const EXIT_USAGE: u8 = 2;

/// mysqldump 结果文件并行导入
#[derive(Parser, Debug)]
#[command(name = "pload", version, about = "Parallel loading of mysqldump result file")]
struct Cli {
    /// 配置文件 (TOML)，命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// mysql 可执行文件路径
    #[arg(short = 'm', long = "mysql")]
    mysql_path: Option<String>,

    /// mysqldump 输出文件
    #[arg(short = 'f', long = "mysql-dump-file")]
    dump_file: Option<PathBuf>,

    /// 目标数据库
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// unix socket，设置后优先使用
    #[arg(short = 's', long)]
    socket: Option<String>,

    /// 用户名
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// 密码
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// 主机
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// 端口
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// 每个分块文件的 INSERT 行数
    #[arg(short = 'l', long = "line-per-file")]
    lines_per_chunk: Option<usize>,

    /// 并行导入线程数 [1, 1024]
    #[arg(short = 'x', long)]
    parallel: Option<usize>,

    /// 存放分块文件的临时目录
    #[arg(short = 't', long = "tmp-dir")]
    tmp_dir: Option<PathBuf>,

    /// 分块导入成功后删除
    #[arg(short = 'c', long, conflicts_with = "keep_chunks")]
    delete_after_load: bool,

    /// 保留已导入的分块文件
    #[arg(long)]
    keep_chunks: bool,

    /// 关闭 unique_checks、innodb_flush_log_at_trx_commit 等
    #[arg(short = 'b', long, conflicts_with = "no_fast_mode")]
    fast_mode: bool,

    /// 不修改 unique_checks 和 innodb_flush_log_at_trx_commit
    #[arg(long)]
    no_fast_mode: bool,

    /// 失败分块记录文件 (JSONL)
    #[arg(long)]
    failure_log: Option<String>,

    /// 分块序号计数器文件，用于多个进程共同导入
    #[arg(long)]
    claim_file: Option<String>,

    /// 输出调试信息
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<(Config, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("读取配置文件 {} 失败", path.display()))?,
            None => Config::default(),
        };

        let client = &mut config.client;
        if let Some(v) = self.mysql_path {
            client.binary = v;
        }
        if let Some(v) = self.socket {
            client.socket = v;
        }
        if let Some(v) = self.user {
            client.user = v;
        }
        if let Some(v) = self.password {
            client.password = v;
        }
        if let Some(v) = self.host {
            client.host = v;
        }
        if let Some(v) = self.port {
            client.port = v;
        }

        let load = &mut config.load;
        if let Some(v) = self.dump_file {
            load.dump_file = v;
        }
        if let Some(v) = self.database {
            load.database = v;
        }
        if let Some(v) = self.lines_per_chunk {
            load.lines_per_chunk = v;
        }
        if let Some(v) = self.parallel {
            load.parallel = v;
        }
        if let Some(v) = self.tmp_dir {
            load.tmp_dir = v;
        }
        if let Some(v) = self.failure_log {
            load.failure_log = v;
        }
        if let Some(v) = self.claim_file {
            load.claim_file = v;
        }
        if self.delete_after_load {
            load.delete_after_load = true;
        }
        if self.keep_chunks {
            load.delete_after_load = false;
        }
        if self.fast_mode {
            load.fast_mode = true;
        }
        if self.no_fast_mode {
            load.fast_mode = false;
        }

        config.normalize();
        config.validate()?;
        Ok((config, self.verbose))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, verbose) = match cli.into_config() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    #[cfg(feature = "logging")]
    let _log_guard = {
        use mysql_pload::logging::{LogConfig, init_logging};
        match LogConfig::from_settings(&config.log, verbose)
            .and_then(init_logging)
        {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("error: 日志初始化失败: {e}");
                return ExitCode::from(EXIT_USAGE);
            }
        }
    };
    #[cfg(not(feature = "logging"))]
    let _ = verbose;

    let client = Arc::new(MysqlClient::new(config.client.clone()));
    let mut loader = Loader::new(config, client);
    match loader.run() {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(report) => {
            if !report.pool.workers_succeeded() {
                eprintln!("导入失败: 有工作线程异常退出");
            }
            if !report.pool.failed.is_empty() {
                eprintln!("导入失败: {} 个分块导入失败", report.pool.failed.len());
            }
            if let Some(e) = &report.restore_error {
                eprintln!("恢复服务端变量失败: {e}");
            }
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_precondition() {
                eprintln!("服务端变量未被修改");
            }
            if let Some(restore) = loader.restore_error() {
                eprintln!("恢复服务端变量失败: {restore}");
            }
            if matches!(e, LoadError::Config(_)) {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::from(EXIT_ERROR)
            }
        }
    }
}
