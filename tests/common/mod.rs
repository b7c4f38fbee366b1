//! 集成测试公共模块

#![allow(dead_code)]

use mysql_pload::client::DatabaseClient;
use mysql_pload::error::{LoadError, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// 一次 run_script 调用
#[derive(Debug, Clone)]
pub struct ScriptCall {
    pub database: Option<String>,
    pub path: PathBuf,
    /// 执行时文件中的行数
    pub lines: usize,
    pub thread: Option<String>,
}

/// 记录所有调用的假客户端
///
/// `SHOW VARIABLES LIKE 'x'` 按 mysql 的制表符格式返回变量值，
/// `SET GLOBAL x = v` 修改变量值。
pub struct FakeClient {
    vars: Mutex<HashMap<String, String>>,
    statements: Mutex<Vec<String>>,
    scripts: Mutex<Vec<ScriptCall>>,
    failing_files: HashSet<String>,
    failing_statements: Vec<String>,
    delay: Option<Duration>,
}

impl FakeClient {
    /// 一个处于“未优化”状态的服务端
    pub fn new() -> Self {
        Self::with_vars(&[
            ("foreign_key_checks", "ON"),
            ("unique_checks", "ON"),
            ("autocommit", "OFF"),
            ("innodb_flush_log_at_trx_commit", "1"),
            ("log_bin", "OFF"),
            ("polar_log_bin", "OFF"),
            ("polar_enable_imci", "OFF"),
        ])
    }

    pub fn with_vars(vars: &[(&str, &str)]) -> Self {
        Self {
            vars: Mutex::new(
                vars.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            statements: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            failing_files: HashSet::new(),
            failing_statements: Vec::new(),
            delay: None,
        }
    }

    /// 文件名为 `name` 的脚本执行失败
    pub fn fail_file(mut self, name: &str) -> Self {
        self.failing_files.insert(name.to_string());
        self
    }

    /// 以 `prefix` 开头的语句执行失败
    pub fn fail_statement(mut self, prefix: &str) -> Self {
        self.failing_statements.push(prefix.to_string());
        self
    }

    /// 每次执行脚本前等待
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn var(&self, name: &str) -> Option<String> {
        self.vars.lock().unwrap().get(name).cloned()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<ScriptCall> {
        self.scripts.lock().unwrap().clone()
    }

    /// 执行过的脚本文件名
    pub fn script_names(&self) -> Vec<String> {
        self.scripts()
            .iter()
            .map(|c| file_name(&c.path))
            .collect()
    }

    fn command_error(what: &str) -> LoadError {
        LoadError::Command {
            command: what.to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "ERROR 1062 (23000): Duplicate entry".to_string(),
        }
    }
}

impl DatabaseClient for FakeClient {
    fn run_script(&self, database: Option<&str>, path: &Path) -> Result<()> {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        let lines = fs::read_to_string(path)?.lines().count();
        self.scripts.lock().unwrap().push(ScriptCall {
            database: database.map(str::to_string),
            path: path.to_path_buf(),
            lines,
            thread: std::thread::current().name().map(str::to_string),
        });
        if self.failing_files.contains(&file_name(path)) {
            return Err(Self::command_error(&format!("source {}", path.display())));
        }
        Ok(())
    }

    fn query_text(&self, sql: &str) -> Result<String> {
        self.statements.lock().unwrap().push(sql.to_string());
        if self.failing_statements.iter().any(|p| sql.starts_with(p.as_str())) {
            return Err(Self::command_error(sql));
        }
        if let Some(rest) = sql.strip_prefix("SHOW VARIABLES LIKE '") {
            let name = rest.trim_end_matches('\'');
            return Ok(match self.vars.lock().unwrap().get(name) {
                Some(v) => format!("Variable_name\tValue\n{name}\t{v}\n"),
                None => String::new(),
            });
        }
        if let Some(rest) = sql.strip_prefix("SET GLOBAL ") {
            if let Some((name, value)) = rest.split_once(" = ") {
                self.vars
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), value.to_string());
            }
        }
        Ok(String::new())
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// 写一个测试用 dump 文件
pub fn write_dump(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("Failed to write dump file");
    path
}

/// `count` 行 INSERT，第 i 行插入值 i
pub fn insert_lines(count: usize) -> String {
    (0..count)
        .map(|i| format!("INSERT INTO `t` VALUES ({i});\n"))
        .collect()
}

/// 标准 mysqldump 头部
pub const DUMP_HEADER: &str = "-- MySQL dump 10.13\n\
/*!40101 SET NAMES utf8mb4 */;\n\
SET @@GLOBAL.GTID_PURGED=/*!80000 '+'*/ '3E11FA47-71CA-11E1-9E33-C80AA9429562:1-5';\n\
DROP TABLE IF EXISTS `t`;\n\
CREATE TABLE `t` (\n\
  `id` int NOT NULL\n\
) ENGINE=InnoDB;\n";

/// 生成 `n` 个分块文件，每个一行
pub fn make_chunks(dir: &TempDir, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let p = dir.path().join(format!("f_data_{i}.sql"));
            fs::write(&p, format!("INSERT INTO `t` VALUES ({i});\n")).unwrap();
            p
        })
        .collect()
}
