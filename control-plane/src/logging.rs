use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::ControlPlaneError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Logging configuration for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include timestamps in logs
    pub include_timestamp: bool,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable span events (enter/exit)
    pub enable_span_events: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Log file path (optional, if None logs only to stdout)
    pub log_file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: usize,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        module_levels.insert("control_plane".to_string(), "info".to_string());
        module_levels.insert("intercept_proxy".to_string(), "info".to_string());
        module_levels.insert("hudsucker".to_string(), "warn".to_string());
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("tokio".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_timestamp: true,
            include_thread_names: true,
            include_file_info: false,
            enable_span_events: false,
            enable_colors: true,
            log_file: None,
            max_files: 5,
            module_levels,
        }
    }
}

/// Build the filter from the configuration. `RUST_LOG`, when set and valid,
/// replaces it entirely.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ControlPlaneError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    if !levels::is_valid_level(&config.level) {
        return Err(ControlPlaneError::Logging(format!(
            "Invalid log level: {}",
            config.level
        )));
    }

    let mut filter = EnvFilter::new(&config.level);
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse().map_err(|e| {
            ControlPlaneError::Logging(format!("Invalid log directive: {}", e))
        })?);
    }
    Ok(filter)
}

/// Initialize logging based on the provided configuration.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ControlPlaneError> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config)];
    let guard = match &config.log_file {
        Some(log_file) => {
            let appender = create_file_appender(log_file, config)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_span_events(span_events(config))
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    // Try to initialize logging, ignore if already initialized
    match tracing_subscriber::registry().with(layers).with(filter).try_init() {
        Ok(_) => {
            tracing::info!("Logging initialized with config level: {}", config.level);
        }
        Err(_) => {
            tracing::debug!("Logging already initialized, skipping");
        }
    }

    Ok(guard)
}

fn span_events(config: &LoggingConfig) -> FmtSpan {
    if config.enable_span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    }
}

fn stdout_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info)
        .with_span_events(span_events(config));

    match (config.json_format, config.include_timestamp) {
        (true, true) => layer.json().boxed(),
        (true, false) => layer.json().without_time().boxed(),
        (false, true) => layer.with_ansi(config.enable_colors).boxed(),
        (false, false) => layer.with_ansi(config.enable_colors).without_time().boxed(),
    }
}

/// Daily rolling appender keeping at most `max_files` files.
fn create_file_appender(
    log_file: &str,
    config: &LoggingConfig,
) -> Result<tracing_appender::rolling::RollingFileAppender, ControlPlaneError> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_path = Path::new(log_file);
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let filename = log_path
        .file_name()
        .ok_or_else(|| ControlPlaneError::Logging("Invalid log file name".to_string()))?
        .to_string_lossy()
        .into_owned();

    std::fs::create_dir_all(directory).map_err(|e| {
        ControlPlaneError::Logging(format!("Failed to create log directory: {}", e))
    })?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename)
        .max_log_files(config.max_files.max(1))
        .build(directory)
        .map_err(|e| ControlPlaneError::Logging(format!("Failed to open log file: {}", e)))
}

/// Log level utilities
pub mod levels {
    const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

    /// Check if a log level string is valid, ignoring case
    pub fn is_valid_level(level: &str) -> bool {
        VALID_LEVELS
            .iter()
            .any(|valid| valid.eq_ignore_ascii_case(level))
    }

    pub fn valid_levels() -> &'static [&'static str] {
        &VALID_LEVELS
    }
}
