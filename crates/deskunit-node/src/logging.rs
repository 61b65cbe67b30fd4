//! Logging initialization and configuration.
//!
//! Two modes, picked from `server.production`:
//! - **Production**: JSON logs to a daily rolling file, a second rolling
//!   file holding only panel output, and compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events
//!
//! Panel output is logged under [`DISPLAY_TARGET`] so a unit without a
//! screen still records what the display would have shown.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use deskunit_core::ServerConfig;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the default filter directive.
pub const LOG_LEVEL_ENV: &str = "DESKUNIT_LOG_LEVEL";

/// Target used for everything written to the display.
pub const DISPLAY_TARGET: &str = "deskunit::display";

static GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// How logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// Rolling files under `directory` plus journald-friendly stdout.
    Production {
        /// Directory for the rolling files.
        directory: PathBuf,
    },
    /// Pretty stdout only.
    Development,
}

impl LogMode {
    /// Pick the mode for a server configuration.
    #[must_use]
    pub fn from_config(server: &ServerConfig) -> Self {
        if server.production {
            Self::Production {
                directory: server.log_dir.clone().unwrap_or_else(log_directory),
            }
        } else {
            Self::Development
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over [`LOG_LEVEL_ENV`], which defaults to `info`.
///
/// # Errors
///
/// Returns an error if the filter does not parse or the log directory
/// cannot be created.
pub fn init(mode: &LogMode) -> anyhow::Result<()> {
    let env_filter = env_filter()?;

    match mode {
        LogMode::Production { directory } => init_production(env_filter, directory),
        LogMode::Development => {
            init_development(env_filter);
            Ok(())
        }
    }
}

fn env_filter() -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    Ok(EnvFilter::try_new(directive)?)
}

fn init_production(env_filter: EnvFilter, directory: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(directory)?;

    let (events, events_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        "deskunit",
    ));
    let (panel, panel_guard) = tracing_appender::non_blocking(RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        "panel",
    ));
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let events_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(events)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let panel_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(panel)
        .with_target(false)
        .with_filter(Targets::new().with_target(DISPLAY_TARGET, Level::DEBUG));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout)
        .with_ansi(false)
        .with_filter(production_stdout_filter());

    tracing_subscriber::registry()
        .with(events_layer)
        .with(panel_layer)
        .with(stdout_layer)
        .init();

    let _ = GUARDS.set(vec![events_guard, panel_guard, stdout_guard]);
    Ok(())
}

/// Journald gets warnings and panel status lines, not the full debug stream.
fn production_stdout_filter() -> Targets {
    Targets::new()
        .with_default(Level::WARN)
        .with_target("deskunit_node", Level::INFO)
        .with_target(DISPLAY_TARGET, Level::INFO)
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// Default log directory for the current platform.
#[must_use]
pub fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/deskunit")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "deskunit")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
