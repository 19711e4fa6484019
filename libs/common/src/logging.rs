//! Unified logging module for the acquisition services
//!
//! Console plus daily rolling file output, with a retention window measured in days.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the configured log directory
pub const LOG_DIR_ENV: &str = "ACQ_LOG_DIR";

const SECONDS_PER_DAY: u64 = 86_400;

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message key=value...`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Cycle completed devices=3`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file worker alive for the lifetime of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the file prefix and default filter target
    pub service_name: String,
    /// Directory for daily log files
    pub log_dir: PathBuf,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Number of days a log file is kept
    pub retention_days: u32,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: PathBuf::from("logs"),
            level: Level::INFO,
            retention_days: 7,
            ansi: true,
        }
    }
}

/// Resolve the log directory: `ACQ_LOG_DIR` beats the configured value
pub fn resolve_log_dir(configured: &str) -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(configured))
}

/// Parse a level string, falling back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.service_name.as_str())
        .filename_suffix("log")
        .max_log_files(config.retention_days.max(1) as usize)
        .build(&config.log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }

    // RUST_LOG wins; otherwise the configured level with the service at debug
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(format!(
            "{},{}=debug",
            config.level.as_str().to_lowercase(),
            config.service_name
        ))?,
    };

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(BracketedLevelFormat)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging: {} @ {:?} (retention {} days)",
        config.service_name,
        config.log_dir,
        config.retention_days
    );

    Ok(())
}

// ==================== Log Retention ====================

/// Delete log files in `log_dir` whose modification time is older than the window
///
/// Only files with a `.log` component in their name are considered. Returns the
/// number of files removed.
pub fn sweep_expired_logs(log_dir: &Path, retention_days: u32) -> std::io::Result<usize> {
    let window = Duration::from_secs(u64::from(retention_days) * SECONDS_PER_DAY);
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_log = path
            .file_name()
            .map(|name| name.to_string_lossy().contains(".log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age > window {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Start background log retention task, running once a day
pub fn start_log_retention_task(
    log_dir: PathBuf,
    retention_days: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SECONDS_PER_DAY));

        loop {
            interval.tick().await;
            match sweep_expired_logs(&log_dir, retention_days) {
                Ok(0) => {},
                Ok(n) => tracing::debug!("Log retention removed {} file(s)", n),
                Err(e) => tracing::error!("Log retention error in {:?}: {}", log_dir, e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn parse_level_falls_back_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn sweep_removes_only_expired_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let old_log = dir.path().join("acqsrv.2024-01-01.log");
        let fresh_log = dir.path().join("acqsrv.2024-01-09.log");
        let old_other = dir.path().join("params.db");

        for path in [&old_log, &fresh_log, &old_other] {
            File::create(path).unwrap();
        }

        let ten_days_ago = SystemTime::now() - Duration::from_secs(10 * SECONDS_PER_DAY);
        for path in [&old_log, &old_other] {
            File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(ten_days_ago)
                .unwrap();
        }

        let removed = sweep_expired_logs(dir.path(), 7).unwrap();
        assert_eq!(removed, 1);
        assert!(!old_log.exists());
        assert!(fresh_log.exists());
        assert!(old_other.exists());
    }
}
