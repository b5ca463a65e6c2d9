//! Rolling Logger
//!
//! File logger for the sync client. Log output goes to `<app>.log` in the
//! given directory and rolls over to `<app>.1.log`, `<app>.2.log`, ... once the
//! active file grows past [`MAX_FILE_SIZE`]. The most recent lines are also kept
//! in a circular buffer so a host can display them without touching the disk.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Size at which the active log file is rolled over
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;
/// Number of files kept on disk, including the active one
pub const MAX_FILES: usize = 3;
/// Number of lines kept in the in-memory buffer
pub const BUFFER_LINES: usize = 500;

static RECENT: OnceLock<Mutex<LineBuffer>> = OnceLock::new();

/// Logger errors
#[derive(Debug)]
pub enum LoggerError {
    Io(io::Error),
    Init(String),
    NotInitialized,
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::Io(e) => write!(f, "Log file error: {}", e),
            LoggerError::Init(msg) => write!(f, "Failed to install logger: {}", msg),
            LoggerError::NotInitialized => write!(f, "Logger not initialized"),
        }
    }
}

impl std::error::Error for LoggerError {}

impl From<io::Error> for LoggerError {
    fn from(e: io::Error) -> Self {
        LoggerError::Io(e)
    }
}

/// Bounded buffer of the most recent log lines
#[derive(Debug)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Size-rolled log file
pub struct RollingFile {
    dir: PathBuf,
    app_name: String,
    file: File,
    written: u64,
    max_size: u64,
    max_files: usize,
}

impl RollingFile {
    pub fn open(dir: &Path, app_name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = log_path(dir, app_name, 0);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            app_name: app_name.to_string(),
            file,
            written,
            max_size: MAX_FILE_SIZE,
            max_files: MAX_FILES,
        })
    }

    pub fn with_limits(mut self, max_size: u64, max_files: usize) -> Self {
        self.max_size = max_size;
        self.max_files = max_files.max(1);
        self
    }

    /// Path of the file currently written to
    pub fn active_path(&self) -> PathBuf {
        log_path(&self.dir, &self.app_name, 0)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = log_path(&self.dir, &self.app_name, self.max_files - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (0..self.max_files - 1).rev() {
            let from = log_path(&self.dir, &self.app_name, index);
            if from.exists() {
                fs::rename(&from, log_path(&self.dir, &self.app_name, index + 1))?;
            }
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }

        let n = self.file.write(buf)?;
        self.written += n as u64;

        if let Some(recent) = RECENT.get() {
            if let Ok(mut recent) = recent.lock() {
                let text = String::from_utf8_lossy(&buf[..n]);
                for line in text.lines().filter(|l| !l.is_empty()) {
                    recent.push(line.to_string());
                }
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn log_path(dir: &Path, app_name: &str, index: usize) -> PathBuf {
    if index == 0 {
        dir.join(format!("{}.log", app_name))
    } else {
        dir.join(format!("{}.{}.log", app_name, index))
    }
}

/// Install the global subscriber writing to `<dir>/<app_name>.log`.
///
/// Also bridges records emitted through the `log` crate.
pub fn init_logger(dir: impl AsRef<Path>, app_name: &str) -> Result<(), LoggerError> {
    let file = RollingFile::open(dir.as_ref(), app_name)?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_max_level(tracing::Level::DEBUG)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;
    RECENT.get_or_init(|| Mutex::new(LineBuffer::new(BUFFER_LINES)));

    log::info!(
        "{} logger started at {}",
        app_name,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
    );
    Ok(())
}

pub fn info(msg: &str) -> Result<(), LoggerError> {
    if RECENT.get().is_none() {
        return Err(LoggerError::NotInitialized);
    }
    log::info!("{}", msg);
    Ok(())
}

pub fn error(msg: &str) -> Result<(), LoggerError> {
    if RECENT.get().is_none() {
        return Err(LoggerError::NotInitialized);
    }
    log::error!("{}", msg);
    Ok(())
}

/// Most recent log lines, oldest first
pub fn recent_lines() -> Vec<String> {
    RECENT
        .get()
        .and_then(|recent| recent.lock().ok().map(|r| r.lines()))
        .unwrap_or_default()
}
