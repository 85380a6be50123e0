//! Two-phase logging.
//!
//! The process thread installs the boot logger with [`init_boot`] before
//! anything else runs: stderr, level from `RUST_LOG` or `info`. Once the node
//! thread has its configuration it calls [`LogHandle::switch`] to apply the
//! configured level and, optionally, move output to a log file. The
//! subscriber stays the same across the switch; only its filter and sink
//! change.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::error::AppError;

const BOOT_LEVEL: &str = "info";

// ── Sink ──────────────────────────────────────────────────────────────────────

enum Sink {
    Stderr,
    File(Arc<File>),
}

/// Where formatted lines go. Swapped in place by [`LogHandle::switch`].
#[derive(Clone)]
struct SinkSwitch(Arc<RwLock<Sink>>);

impl SinkSwitch {
    fn stderr() -> Self {
        Self(Arc::new(RwLock::new(Sink::Stderr)))
    }

    fn set(&self, sink: Sink) {
        *self.0.write().unwrap_or_else(|p| p.into_inner()) = sink;
    }
}

enum SinkWriter {
    Stderr(io::Stderr),
    File(Arc<File>),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Stderr(w) => w.write(buf),
            SinkWriter::File(f) => (&**f).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Stderr(w) => w.flush(),
            SinkWriter::File(f) => (&**f).flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for SinkSwitch {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match &*self.0.read().unwrap_or_else(|p| p.into_inner()) {
            Sink::Stderr => SinkWriter::Stderr(io::stderr()),
            Sink::File(f) => SinkWriter::File(f.clone()),
        }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Control over the installed subscriber after boot.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    sink: SinkSwitch,
}

impl LogHandle {
    /// Leave the boot phase: apply `level` and send output to `log_file`
    /// (append mode) or keep it on stderr.
    ///
    /// `level` accepts a plain level (`"debug"`) or a full `EnvFilter`
    /// directive such as `"info,mist_node::comms=debug"`. With `prefer_level`
    /// it wins over `RUST_LOG`; otherwise `RUST_LOG` wins and `level` is the
    /// fallback.
    ///
    /// Nothing changes unless both the filter and the file are usable.
    pub fn switch(
        &self,
        level: &str,
        prefer_level: bool,
        log_file: Option<&Path>,
    ) -> Result<(), AppError> {
        let filter = build_filter(level, prefer_level)?;
        let sink = match log_file {
            Some(path) => Sink::File(Arc::new(open_log_file(path)?)),
            None => Sink::Stderr,
        };
        self.filter
            .reload(filter)
            .map_err(|e| AppError::Logger(format!("failed to apply log level: {e}")))?;
        self.sink.set(sink);
        Ok(())
    }
}

/// Install the boot logger as the global subscriber.
pub fn init_boot() -> Result<LogHandle, AppError> {
    let (subscriber, handle) = boot_subscriber();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;
    Ok(handle)
}

fn boot_subscriber() -> (impl Subscriber + Send + Sync, LogHandle) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BOOT_LEVEL));
    let (filter, filter_handle) = reload::Layer::new(filter);
    let sink = SinkSwitch::stderr();
    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(sink.clone()),
    );
    (subscriber, LogHandle { filter: filter_handle, sink })
}

fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    if prefer_level {
        EnvFilter::try_new(level).or_else(|level_err| {
            EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!(
                    "invalid log level '{level}': {level_err}; RUST_LOG parse failed: {env_err}"
                ))
            })
        })
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
    }
}

fn open_log_file(path: &Path) -> Result<File, AppError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AppError::Logger(format!("failed to open log file '{}': {e}", path.display()))
        })
}

/// Parse a plain level string, rejecting anything else. Used to validate the
/// configured level at load time.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tracing::{debug, info};

    #[test]
    fn valid_levels_parse() {
        for l in &["error", "warn", "info", "debug", "trace"] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(parse_level("INFO_LEVEL").is_err());
    }

    #[test]
    fn switch_moves_output_to_the_log_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.log");
        let (subscriber, handle) = boot_subscriber();

        tracing::subscriber::with_default(subscriber, || {
            info!("boot line");
            handle.switch("debug", true, Some(&path)).unwrap();
            debug!("node line");
        });

        let log = fs::read_to_string(&path).unwrap();
        assert!(log.contains("node line"));
        assert!(!log.contains("boot line"));
    }

    #[test]
    fn unwritable_log_file_leaves_boot_logger_in_place() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_subscriber, handle) = boot_subscriber();
        // A directory cannot be opened as an append-mode file.
        match handle.switch("info", true, Some(dir.path())) {
            Err(AppError::Logger(msg)) => assert!(msg.contains("log file")),
            other => panic!("expected log file error, got {other:?}"),
        }
        assert!(matches!(*handle.sink.0.read().unwrap(), Sink::Stderr));
    }

    #[test]
    fn bad_level_is_rejected_when_preferred_and_no_env() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let (_subscriber, handle) = boot_subscriber();
        assert!(handle.switch("mist_node=loud", true, None).is_err());
    }
}
