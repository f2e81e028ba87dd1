//! 日志模块 - 文件日志与大小轮转

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
///
/// 超过上限时把当前文件重命名为 .old（覆盖上一个备份）后重新打开
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join("mirrortools.log");
        let max_size = (max_size_mb as u64) * 1024 * 1024;

        if oversize(&file_path, max_size) {
            rotate(&file_path)?;
        }

        let writer = open_append(&file_path)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// 检查并轮转日志文件
    fn rotate_if_needed(&self) {
        if !oversize(&self.file_path, self.max_size) {
            return;
        }

        let mut guard = self.writer.lock().unwrap();
        let _ = guard.flush();
        if rotate(&self.file_path).is_ok() {
            if let Ok(new_writer) = open_append(&self.file_path) {
                *guard = new_writer;
            }
        }
    }
}

fn oversize(path: &Path, max_size: u64) -> bool {
    fs::metadata(path).map(|m| m.len() > max_size).unwrap_or(false)
}

fn rotate(path: &Path) -> io::Result<()> {
    let backup = path.with_extension("log.old");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(path, &backup)
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// 单次写入的句柄
pub struct LogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        let n = guard.write(buf)?;
        guard.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        // 在创建写入器前检查轮转
        self.rotate_if_needed();

        LogWriter {
            inner: self.writer.clone(),
        }
    }
}

/// 获取日志目录路径
pub fn get_log_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("mirrortools"))
        .unwrap_or_else(|| PathBuf::from(".mirrortools"))
}
