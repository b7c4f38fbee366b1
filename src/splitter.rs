//! dump 文件切分
//!
//! 逐行流式读取 mysqldump 输出，把 INSERT 语句按固定行数切成若干数据分块，
//! 其余语句全部写入一个 schema 文件。内存占用与输入大小无关。
//!
//! 注意：出现在数据之后的 DDL 也会被追加到 schema 文件，相对 INSERT 的位置
//! 不再保留。这要求 schema 语句不依赖任何已导入的数据。

use crate::error::{LoadError, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// schema 文件名
pub const SCHEMA_FILE_NAME: &str = "f_schema.sql";

/// 单行的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// 写入 schema 文件
    Schema,
    /// INSERT 语句，写入数据分块
    Data,
    /// 可以安全丢弃的指令，例如 GTID_PURGED
    Skip,
    /// 建库或切库，不支持
    Abort,
}

/// 按行首判断语句类型，不依赖上下文
pub fn classify_line(line: &[u8]) -> LineKind {
    if line.starts_with(b"INSERT") {
        return LineKind::Data;
    }
    if line.starts_with(b"CREATE DATABASE") || line.starts_with(b"USE ") {
        return LineKind::Abort;
    }
    if line.starts_with(b"SET") && contains(line, b"GTID_PURGED") {
        return LineKind::Skip;
    }
    LineKind::Schema
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// 切分结果
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    /// 分块所在目录
    pub work_dir: PathBuf,
    /// schema 文件
    pub schema_path: PathBuf,
    /// 数据分块，下标即分块序号
    pub chunk_paths: Vec<PathBuf>,
    /// 读取的总行数
    pub total_lines: usize,
    /// INSERT 行数
    pub data_lines: usize,
    /// 被丢弃的行数
    pub skipped_lines: usize,
    /// 出现在第一个数据分块之后、被移到 schema 文件的行数
    pub relocated_schema_lines: usize,
}

impl SplitResult {
    pub fn chunk_count(&self) -> usize {
        self.chunk_paths.len()
    }
}

/// 正在写入的分块
struct OpenChunk {
    writer: BufWriter<File>,
    lines: usize,
}

/// 流式切分器
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    lines_per_chunk: usize,
    work_dir: PathBuf,
}

impl ChunkSplitter {
    /// `lines_per_chunk` 小于 1 时按 1 处理
    pub fn new<P: Into<PathBuf>>(lines_per_chunk: usize, work_dir: P) -> Self {
        Self { lines_per_chunk: lines_per_chunk.max(1), work_dir: work_dir.into() }
    }

    pub fn lines_per_chunk(&self) -> usize {
        self.lines_per_chunk
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn schema_path(&self) -> PathBuf {
        self.work_dir.join(SCHEMA_FILE_NAME)
    }

    /// 第 `index` 个数据分块的路径
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.work_dir.join(format!("f_data_{index}.sql"))
    }

    /// 切分文件
    ///
    /// # Errors
    /// - `LoadError::InputNotFound` - 输入文件不存在，此时不产生任何文件
    /// - `LoadError::MultiDatabase` - 输入包含建库/切库语句，已写出的文件会被删除
    /// - `LoadError::Io` - 读写失败
    pub fn split<P: AsRef<Path>>(&self, input: P) -> Result<SplitResult> {
        let input = input.as_ref();
        if !input.is_file() {
            return Err(LoadError::InputNotFound(input.to_path_buf()));
        }

        #[cfg(feature = "logging")]
        tracing::info!(
            "切分输入文件 `{}`，每个分块 {} 行 INSERT ...",
            input.display(),
            self.lines_per_chunk
        );

        let file = File::open(input)?;
        self.split_reader(BufReader::with_capacity(256 * 1024, file))
    }

    /// 从任意 reader 切分
    pub fn split_reader<R: BufRead>(&self, reader: R) -> Result<SplitResult> {
        fs::create_dir_all(&self.work_dir)?;

        let mut result = SplitResult {
            work_dir: self.work_dir.clone(),
            schema_path: self.schema_path(),
            ..SplitResult::default()
        };

        match self.stream(reader, &mut result) {
            Ok(()) => {
                #[cfg(feature = "logging")]
                tracing::info!(
                    "切分完成 (共处理 {} 行): {} 个数据分块, {} 行 INSERT, 丢弃 {} 行",
                    result.total_lines,
                    result.chunk_count(),
                    result.data_lines,
                    result.skipped_lines
                );
                Ok(result)
            }
            Err(e) => {
                self.discard_outputs(&result);
                Err(e)
            }
        }
    }

    fn stream<R: BufRead>(
        &self,
        mut reader: R,
        result: &mut SplitResult,
    ) -> Result<()> {
        let mut schema = BufWriter::new(File::create(&result.schema_path)?);
        let mut current: Option<OpenChunk> = None;
        let mut line = Vec::with_capacity(4096);

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            result.total_lines += 1;

            match classify_line(&line) {
                LineKind::Data => {
                    if current
                        .as_ref()
                        .is_some_and(|c| c.lines >= self.lines_per_chunk)
                    {
                        if let Some(full) = current.take() {
                            close_chunk(full)?;
                        }
                    }
                    if current.is_none() {
                        let index = result.chunk_paths.len();
                        let path = self.chunk_path(index);
                        // 先登记路径，失败清理时才能找到它
                        result.chunk_paths.push(path.clone());
                        #[cfg(feature = "logging")]
                        tracing::debug!("创建数据分块 {}", path.display());
                        current = Some(OpenChunk {
                            writer: BufWriter::new(File::create(&path)?),
                            lines: 0,
                        });
                    }
                    if let Some(chunk) = current.as_mut() {
                        chunk.writer.write_all(&line)?;
                        chunk.lines += 1;
                    }
                    result.data_lines += 1;
                }
                LineKind::Abort => {
                    let content =
                        String::from_utf8_lossy(&line).trim_end().to_string();
                    return Err(LoadError::multi_database(
                        result.total_lines,
                        content,
                    ));
                }
                LineKind::Skip => {
                    #[cfg(feature = "logging")]
                    tracing::info!(
                        "跳过 GTID_PURGED 设置: {}",
                        String::from_utf8_lossy(&line).trim_end()
                    );
                    result.skipped_lines += 1;
                }
                LineKind::Schema => {
                    if !result.chunk_paths.is_empty() {
                        #[cfg(feature = "logging")]
                        {
                            if result.relocated_schema_lines == 0 {
                                tracing::debug!(
                                    "第{}行的非 INSERT 语句出现在数据之后，移入 schema 文件",
                                    result.total_lines
                                );
                            }
                        }
                        result.relocated_schema_lines += 1;
                    }
                    schema.write_all(&line)?;
                }
            }
        }

        schema.flush()?;
        if let Some(last) = current.take() {
            close_chunk(last)?;
        }
        Ok(())
    }

    /// 删除本次切分写出的文件
    fn discard_outputs(&self, result: &SplitResult) {
        let targets =
            std::iter::once(&result.schema_path).chain(&result.chunk_paths);
        for path in targets {
            if let Err(e) = fs::remove_file(path) {
                #[cfg(feature = "logging")]
                {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("删除文件 {} 失败: {}", path.display(), e);
                    }
                }
                #[cfg(not(feature = "logging"))]
                let _ = e;
            }
        }
    }
}

fn close_chunk(mut chunk: OpenChunk) -> Result<()> {
    chunk.writer.flush()?;
    Ok(())
}

/// 准备分块目录
///
/// - 目录已存在时改名为 `<dir>-back`（旧的 `-back` 目录先删除），避免混入上次的分块
/// - 创建目录后检查剩余空间，`min_free_bytes` 为 0 时不检查
pub fn prepare_work_dir(work_dir: &Path, min_free_bytes: u64) -> Result<()> {
    if work_dir.exists() {
        let backup = backup_path(work_dir);
        #[cfg(feature = "logging")]
        tracing::info!(
            "临时目录 '{}' 已存在，移动到 '{}'",
            work_dir.display(),
            backup.display()
        );
        if backup.exists() {
            #[cfg(feature = "logging")]
            tracing::info!("`{}` 已存在，先删除", backup.display());
            fs::remove_dir_all(&backup)?;
        }
        fs::rename(work_dir, &backup)?;
    }

    fs::create_dir_all(work_dir)?;
    check_free_space(work_dir, min_free_bytes)
}

fn backup_path(work_dir: &Path) -> PathBuf {
    let mut name = work_dir.as_os_str().to_owned();
    name.push("-back");
    PathBuf::from(name)
}

/// 剩余空间低于 `min_free_bytes` 时返回错误
pub fn check_free_space(dir: &Path, min_free_bytes: u64) -> Result<()> {
    if min_free_bytes == 0 {
        return Ok(());
    }
    let available = fs2::available_space(dir)?;
    if available < min_free_bytes {
        return Err(LoadError::InsufficientSpace {
            path: dir.to_path_buf(),
            available,
            required: min_free_bytes,
        });
    }
    #[cfg(feature = "logging")]
    tracing::debug!("临时目录 {} 剩余空间 {} 字节", dir.display(), available);
    Ok(())
}
