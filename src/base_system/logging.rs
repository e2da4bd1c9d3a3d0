//! 日志系统：控制台（stderr）输出，可选写入日志目录并在退出时打包归档。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024; // 10MB
const LATEST_LOG: &str = "latest.log";
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("log file i/o failed")]
    Io(#[from] io::Error),
    #[error("log archive failed")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    /// 设置后在此目录写入 `latest.log`。
    pub log_dir: Option<PathBuf>,
    pub archive_on_exit: bool,
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::WARN
        };

        let console_layer = fmt::layer()
            .with_target(false)
            .with_level(true)
            .with_ansi(options.use_color)
            .with_writer(BoxMakeWriter::new(io::stderr))
            .with_filter(console_level);

        let mut guard = None;
        let mut file = None;
        let file_layer = match options.log_dir.as_deref() {
            Some(logs_dir) => {
                fs::create_dir_all(logs_dir)?;
                let latest_log = logs_dir.join(LATEST_LOG);
                archive_if_large(&latest_log, logs_dir)?;

                let file_appender = rolling::never(logs_dir, LATEST_LOG);
                let (file_writer, worker_guard) = non_blocking::NonBlockingBuilder::default()
                    .lossy(false)
                    .finish(file_appender);
                guard = Some(worker_guard);
                file = Some((logs_dir.to_path_buf(), latest_log));

                Some(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_thread_names(true)
                        .with_ansi(false)
                        .with_writer(file_writer)
                        .with_filter(LevelFilter::DEBUG),
                )
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        let runtime = Arc::new(LogRuntime {
            file,
            guard: Mutex::new(guard),
            exit_called: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit,
        });

        runtime.install_signal_handler();
        runtime.install_panic_hook();

        Ok(Self { runtime })
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    /// 文件日志开启时为 `(logs_dir, latest_log)`。
    file: Option<(PathBuf, PathBuf)>,
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
    archive_on_exit: bool,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let _ = ctrlc::set_handler(move || {
            runtime.safe_exit();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                error!("panic at {}:{}: {}", location.file(), location.line(), info);
            } else {
                error!("panic: {info}");
            }
            runtime.safe_exit();
            previous(info);
        }));
    }

    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }

        // 释放 guard 会刷新非阻塞写入器
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }

        if self.archive_on_exit {
            if let Some((logs_dir, latest_log)) = &self.file {
                if let Err(err) = archive_log_file(latest_log, logs_dir) {
                    eprintln!("failed to archive log: {err}");
                }
            }
        }
    }
}

fn archive_if_large(latest_log: &Path, logs_dir: &Path) -> Result<(), LogError> {
    if let Ok(meta) = fs::metadata(latest_log) {
        if meta.len() >= MAX_LOG_BYTES {
            archive_log_file(latest_log, logs_dir)?;
        }
    }
    Ok(())
}

fn archive_log_file(latest_log: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    if !latest_log.exists() {
        return Ok(None);
    }
    let meta = fs::metadata(latest_log)?;
    if meta.len() == 0 {
        let _ = fs::remove_file(latest_log);
        return Ok(None);
    }

    let timestamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let archive_path = unique_archive_path(logs_dir, &timestamp);

    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{timestamp}.log"), options)?;

    let mut log_file = File::open(latest_log)?;
    io::copy(&mut log_file, &mut zip)?;
    zip.finish()?;
    drop(log_file);

    let _ = fs::remove_file(latest_log);

    info!("log archived to {}", archive_path.display());
    Ok(Some(archive_path))
}

/// 同一秒内的两次运行不能互相覆盖归档。
fn unique_archive_path(logs_dir: &Path, timestamp: &str) -> PathBuf {
    let mut candidate = logs_dir.join(format!("log_{timestamp}.zip"));
    let mut n = 1;
    while candidate.exists() {
        candidate = logs_dir.join(format!("log_{timestamp}_{n}.zip"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn archive_zips_and_removes_latest_log() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join(LATEST_LOG);
        fs::write(&latest, "line one\nline two\n").unwrap();

        let archive = archive_log_file(&latest, dir.path()).unwrap().unwrap();
        assert!(archive.exists());
        assert!(!latest.exists());

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let mut contents = String::new();
        zip.by_index(0).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }

    #[test]
    fn empty_log_is_removed_without_archive() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join(LATEST_LOG);
        fs::write(&latest, "").unwrap();

        assert!(archive_log_file(&latest, dir.path()).unwrap().is_none());
        assert!(!latest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn small_log_is_left_alone_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join(LATEST_LOG);
        fs::write(&latest, "small").unwrap();

        archive_if_large(&latest, dir.path()).unwrap();
        assert!(latest.exists());
    }

    #[test]
    fn archive_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_archive_path(dir.path(), "20260101_000000");
        fs::write(&first, b"zip").unwrap();
        let second = unique_archive_path(dir.path(), "20260101_000000");
        assert_ne!(first, second);
        assert!(second.ends_with("log_20260101_000000_1.zip"));
    }
}
