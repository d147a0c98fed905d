//! Unified logging module for the IED services
//!
//! Console output plus a daily-rolling log file written through a
//! non-blocking `tracing-appender` worker. The global filter is reloadable so
//! the level can be changed while the service runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "IED_LOG_DIR";

/// Default max file size before an intra-day rotation: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message`
///
/// Example output: `2026-10-19T08:12:44.809211Z [INFO] Server listening on 0.0.0.0:102`
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
        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

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

// ============================================================================
// Log root directory
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the log root directory
///
/// Priority:
/// 1. `IED_LOG_DIR` environment variable
/// 2. `config_dir` parameter
/// 3. Default "logs"
pub fn init_log_root(config_dir: Option<&Path>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.map_or_else(|| PathBuf::from("logs"), Path::to_path_buf))
    });
}

/// Log root directory; test binaries default to the system temp directory
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                if is_test_environment() {
                    std::env::temp_dir().join("ied-test-logs")
                } else {
                    PathBuf::from("logs")
                }
            })
    })
}

fn is_test_environment() -> bool {
    if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
        return true;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.to_str().map(str::to_string))
        .is_some_and(|p| p.contains("target/debug/deps") || p.contains("target/release/deps"))
}

// ============================================================================
// Daily rolling file writer
// ============================================================================

/// File writer named `{YYYYMMDD}_{service}.log`
///
/// Switches to a new file when the date changes or the current file is
/// deleted, and to `{YYYYMMDD}_{service}.{N}.log` when it exceeds the size
/// limit within a day.
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    state: Arc<Mutex<RollingState>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

struct RollingState {
    date: String,
    file: File,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;
        let date = today();
        let file = open_append(&log_dir.join(format!("{date}_{service_name}.log")))?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            state: Arc::new(Mutex::new(RollingState { date, file })),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    fn base_path(&self, date: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", date, self.service_name))
    }

    fn rotate_by_size(&self, state: &mut RollingState) -> std::io::Result<()> {
        let count = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.log_dir.join(format!(
            "{}_{}.{}.log",
            state.date, self.service_name, count
        ));
        state.file = open_append(&path)?;
        self.current_size.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn roll_if_needed(&self, state: &mut RollingState) -> std::io::Result<()> {
        let today = today();
        let date_changed = state.date != today;
        if !date_changed && self.base_path(&state.date).exists() {
            return Ok(());
        }

        fs::create_dir_all(&self.log_dir)?;
        if date_changed {
            state.date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
        }
        state.file = open_append(&self.base_path(&state.date))?;
        let size = state.file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_size.store(size, Ordering::SeqCst);
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        self.roll_if_needed(&mut state)?;
        if self.current_size.load(Ordering::Relaxed) + buf.len() as u64 > self.max_file_size {
            self.rotate_by_size(&mut state)?;
        }
        let written = state.file.write(buf)?;
        self.current_size
            .fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().file.flush()
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

// ============================================================================
// Reloadable writer
// ============================================================================

/// Writer whose underlying non-blocking sink can be swapped (log reopen)
#[derive(Clone)]
struct ReloadableWriter {
    inner: Arc<Mutex<NonBlocking>>,
}

impl ReloadableWriter {
    fn new(writer: NonBlocking) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    fn reload(&self, writer: NonBlocking) {
        *self.inner.lock() = writer;
    }
}

impl Write for ReloadableWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().flush()
    }
}

impl MakeWriter<'_> for ReloadableWriter {
    type Writer = ReloadableWriter;

    fn make_writer(&self) -> Self::Writer {
        self.clone()
    }
}

// ============================================================================
// Global state
// ============================================================================

struct LogRuntime {
    service_name: String,
    log_dir: PathBuf,
    max_file_size: u64,
    writer: ReloadableWriter,
    _guard: WorkerGuard,
}

static LOG_RUNTIME: OnceLock<Mutex<LogRuntime>> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "iedsrv")
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Level used when `RUST_LOG` is not set
    pub console_level: Level,
    /// Write JSON lines to the log file instead of the bracketed format
    pub enable_json: bool,
    /// Disable ANSI colors on the console
    pub no_color: bool,
    /// Size limit of a single log file
    pub max_file_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            enable_json: false,
            no_color: false,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Build the filter string used when `RUST_LOG` is unset
fn default_filter(config: &LogConfig) -> String {
    let level = config.console_level.as_str().to_ascii_lowercase();
    let crate_name = config.service_name.replace('-', "_");
    if config.console_level < Level::DEBUG {
        // Less verbose than debug: keep the service's own debug output in the file
        format!("{level},{crate_name}=debug")
    } else {
        level
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_writer = DailyRollingWriter::new(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    let writer = ReloadableWriter::new(non_blocking);

    // Respect RUST_LOG when present
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&config));
    let (reload_filter, reload_handle) = reload::Layer::new(EnvFilter::try_new(&filter_str)?);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(!config.no_color)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(writer.clone())
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer.clone())
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    let _ = LOG_RUNTIME.set(Mutex::new(LogRuntime {
        service_name: config.service_name.clone(),
        log_dir: config.log_dir.clone(),
        max_file_size: config.max_file_size,
        writer,
        _guard: guard,
    }));

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Reopen the log file (e.g. after external rotation or deletion)
pub fn reopen_logs_now() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = LOG_RUNTIME
        .get()
        .ok_or("logging not initialized (runtime config missing)")?;
    let mut runtime = runtime.lock();

    let file_writer = DailyRollingWriter::new(
        runtime.service_name.clone(),
        runtime.log_dir.clone(),
        runtime.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    runtime.writer.reload(non_blocking);
    // Dropping the old guard flushes and closes the previous file
    runtime._guard = guard;

    tracing::debug!("Log reopened");
    Ok(())
}

/// Install SIGHUP listener to reopen logs on demand (Unix only)
pub fn enable_sighup_log_reopen() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            match signal(SignalKind::hangup()) {
                Ok(mut hup) => loop {
                    hup.recv().await;
                    if let Err(e) = reopen_logs_now() {
                        tracing::warn!("SIGHUP reopen: {}", e);
                    }
                },
                Err(e) => tracing::warn!("SIGHUP handler: {}", e),
            }
        });
    }
}

/// Dynamically set log filter level at runtime
///
/// Accepts a level (`"debug"`) or a full filter spec (`"info,iedsrv=trace"`).
///
/// # Example
/// ```ignore
/// common::logging::set_log_level("debug")?;
/// ```
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        *current.lock() = level.to_string();
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Current log filter string
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .map(|m| m.lock().clone())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_filter_keeps_service_debug() {
        let config = LogConfig {
            service_name: "iedsrv".to_string(),
            console_level: Level::INFO,
            ..Default::default()
        };
        assert_eq!(default_filter(&config), "info,iedsrv=debug");

        let config = LogConfig {
            service_name: "iedsrv".to_string(),
            console_level: Level::TRACE,
            ..Default::default()
        };
        assert_eq!(default_filter(&config), "trace");
    }

    #[test]
    fn test_rolling_writer_creates_dated_file() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DailyRollingWriter::new("iedsrv".to_string(), dir.path().to_path_buf(), 1024).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let path = dir.path().join(format!("{}_iedsrv.log", today()));
        assert_eq!(fs::read_to_string(path).unwrap(), "hello\n");
    }

    #[test]
    fn test_rolling_writer_rotates_by_size() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DailyRollingWriter::new("iedsrv".to_string(), dir.path().to_path_buf(), 8).unwrap();
        writer.write_all(b"12345678").unwrap();
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();

        let rotated = dir.path().join(format!("{}_iedsrv.1.log", today()));
        assert_eq!(fs::read_to_string(rotated).unwrap(), "abc");
    }

    #[test]
    fn test_rolling_writer_recreates_deleted_file() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            DailyRollingWriter::new("iedsrv".to_string(), dir.path().to_path_buf(), 1024).unwrap();
        let path = dir.path().join(format!("{}_iedsrv.log", today()));
        fs::remove_file(&path).unwrap();

        writer.write_all(b"again").unwrap();
        writer.flush().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "again");
    }

    #[test]
    fn test_get_log_level_before_init() {
        if LOG_FILTER_HANDLE.get().is_none() {
            assert_eq!(get_log_level(), "unknown");
            assert!(set_log_level("debug").is_err());
        }
    }
}
