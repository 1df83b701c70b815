use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "dockwatch.log";

/// Keeps the shared log file handle alive for the process lifetime.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// `RUST_LOG` wins; then `--debug`; then `DOCKWATCH_LOG_LEVEL`; then `info`.
pub fn level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    match std::env::var("DOCKWATCH_LOG_LEVEL") {
        Ok(level) if !level.trim().is_empty() => level,
        _ => "info".to_string(),
    }
}

pub fn init(debug: bool, log_dir: Option<&str>) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level(debug)));
    let guard = match log_dir {
        Some(dir) => open_log_file(Path::new(dir)).unwrap_or_else(|err| {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }),
        None => LogGuard { file: None },
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE_NAME)
}

fn open_log_file(dir: &Path) -> io::Result<LogGuard> {
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path(dir))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

/// Tees formatted log lines to stdout and the optional log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = file.flush();
        }
        Ok(())
    }
}
