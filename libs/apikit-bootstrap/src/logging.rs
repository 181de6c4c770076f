//! Subscriber setup: human-readable console output plus an optional rotating
//! JSON file, each with its own per-target levels. `RUST_LOG`, when set, caps
//! both sinks.

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LoggingConfig, Section};
use crate::paths::home_dir::under_home;

// Keeps the non-blocking console worker alive for the process lifetime
static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const DEFAULT_SECTION: &str = "default";

/// Unknown names fall back to INFO; "off"/"none" disable the sink.
fn parse_level(raw: &str) -> LevelFilter {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => LevelFilter::INFO,
        "none" => LevelFilter::OFF,
        other => LevelFilter::from_str(other).unwrap_or(LevelFilter::INFO),
    }
}

#[derive(Clone)]
struct RotatingFile(Arc<Mutex<FileRotate<AppendCount>>>);

impl RotatingFile {
    fn open(path: &Path, section: &Section) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let max_bytes = section.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;
        let rotate = FileRotate::new(
            path,
            AppendCount::new(section.max_backups.unwrap_or(3)),
            ContentLimit::BytesSurpassed(max_bytes),
            Compression::None,
            None,
        );
        Ok(Self(Arc::new(Mutex::new(rotate))))
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Per-target levels for the console sink.
fn console_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get(DEFAULT_SECTION)
        .map(|s| parse_level(&s.console_level))
        .unwrap_or(LevelFilter::INFO);
    cfg.iter()
        .filter(|(target, _)| target.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |targets, (target, s)| {
            targets.with_target(target.clone(), parse_level(&s.console_level))
        })
}

/// Per-target levels for the file sink; defaults to OFF unless the default
/// section names a file.
fn file_targets(cfg: &LoggingConfig) -> Targets {
    let default = cfg
        .get(DEFAULT_SECTION)
        .filter(|s| !s.file.trim().is_empty())
        .map(|s| parse_level(&s.file_level))
        .unwrap_or(LevelFilter::OFF);
    cfg.iter()
        .filter(|(target, _)| target.as_str() != DEFAULT_SECTION)
        .fold(Targets::new().with_default(default), |targets, (target, s)| {
            let level = if s.file_level.trim().is_empty() {
                parse_level(&s.console_level)
            } else {
                parse_level(&s.file_level)
            };
            targets.with_target(target.clone(), level)
        })
}

fn open_log_file(cfg: &LoggingConfig, home: &Path) -> Option<RotatingFile> {
    let section = cfg.get(DEFAULT_SECTION).filter(|s| !s.file.trim().is_empty())?;
    let path = under_home(home, &section.file);
    match RotatingFile::open(&path, section) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Failed to open log file '{}': {e}", path.display());
            None
        }
    }
}

/// Install the global subscriber. Relative log file paths resolve under
/// `home`. A second call is a no-op.
pub fn init_logging(cfg: &LoggingConfig, home: &Path) {
    // Bridge `log` records before the subscriber exists
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let env = EnvFilter::try_from_default_env().ok();

    let (console, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);
    let console_layer = fmt::layer()
        .with_writer(console)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets(cfg));

    let file_layer = open_log_file(cfg, home).map(|file| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(file)
            .with_filter(file_targets(cfg))
    });

    let _ = tracing_subscriber::registry()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
