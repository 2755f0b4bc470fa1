use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::LoggerError;

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_dir: PathBuf,
    /// `trace`, `debug`, `info`, `warn` or `error`; anything else means `info`.
    pub level: String,
    /// Prefix of the log file names, e.g. `rt-tail`.
    pub app_name: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            level: "info".to_string(),
            app_name: "realtime".to_string(),
        }
    }
}

/// Installs a global `fern` logger writing to stdout and to a fresh
/// timestamped file under `log_dir`. Returns the path of that file.
pub fn setup_logging(options: &LogOptions) -> Result<PathBuf, LoggerError> {
    let io_err = |source| LoggerError::Io {
        path: options.log_dir.clone(),
        source,
    };
    if !options.log_dir.exists() {
        fs::create_dir_all(&options.log_dir).map_err(io_err)?;
    }

    // Keep only the newest previous log of this app next to the new one
    cleanup_old_logs(&options.log_dir, &options.app_name, 1).map_err(io_err)?;

    let log_file_name = format!(
        "{}_{}.log",
        options.app_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = options.log_dir.join(log_file_name);
    let log_file = fern::log_file(&log_path).map_err(|source| LoggerError::Io {
        path: log_path.clone(),
        source,
    })?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(&options.level))
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()?;

    Ok(log_path)
}

pub fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// Deletes all but the `keep` most recent `<app_name>_*.log` files.
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> std::io::Result<usize> {
    let prefix = format!("{app_name}_");
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}
