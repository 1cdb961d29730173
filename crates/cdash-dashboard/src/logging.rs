use crate::config::Config;
use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "cdash-dashboard.log";

/// Keeps the log file handle alive for the lifetime of the process.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// The terminal belongs to the UI, so stdout only gets a copy on request.
struct MultiWriter {
    stdout: Option<io::Stdout>,
    file: Option<Arc<Mutex<File>>>,
}

impl MultiWriter {
    fn new(stdout: bool, file: Option<Arc<Mutex<File>>>) -> Self {
        Self {
            stdout: stdout.then(io::stdout),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(stdout) = self.stdout.as_mut() {
            let _ = stdout.write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stdout) = self.stdout.as_mut() {
            let _ = stdout.flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

pub fn init_logging(config: &Config) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let guard = match open_log_file(config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let stdout = config.log_stdout;
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(stdout, file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(stdout)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// Panics go to the log instead of stderr, which the UI owns while it runs.
/// The bus catches handler panics, so this hook must not touch the terminal.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "-".to_string());
        tracing::error!(
            event = "panic",
            location = %location,
            message = panic_message(info.payload())
        );
    }));
}

pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn open_log_file(log_dir: Option<&str>) -> io::Result<LogGuard> {
    let Some(log_dir) = log_dir.filter(|dir| !dir.trim().is_empty()) else {
        return Ok(LogGuard { file: None });
    };
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_log_dir_means_no_file() {
        let guard = open_log_file(None).expect("guard");
        assert!(!guard.has_file());
        let guard = open_log_file(Some("  ")).expect("guard");
        assert!(!guard.has_file());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let literal: Box<dyn Any + Send> = Box::new("handler exploded");
        assert_eq!(panic_message(literal.as_ref()), "handler exploded");

        let caught = std::panic::catch_unwind(|| panic!("row {} missing", 7));
        let payload = caught.expect_err("panicked");
        assert_eq!(panic_message(payload.as_ref()), "row 7 missing");

        let opaque: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(opaque.as_ref()), "non-string panic payload");
    }

    #[test]
    fn writer_appends_to_log_file() {
        let dir = std::env::temp_dir().join(format!("cdash-log-test-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();
        let guard = open_log_file(Some(&dir_str)).expect("guard");
        assert!(guard.has_file());

        let mut writer = MultiWriter::new(false, guard.file.clone());
        writer.write_all(b"first\n").expect("write");
        writer.write_all(b"second\n").expect("write");
        writer.flush().expect("flush");

        let contents = std::fs::read_to_string(dir.join(LOG_FILE_NAME)).expect("read");
        assert!(contents.ends_with("first\nsecond\n"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
