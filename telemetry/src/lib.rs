//! Standardized telemetry for the update agent.
//!
//! Events go to two places: the system log and the process's own stdio. On hosts with journald
//! the journal is used; everywhere else (OpenWrt's `logd`, busybox `syslogd`) events are sent as
//! syslog datagrams to `/dev/log`. Informational events go to stdout and warnings and errors to
//! stderr, so that cron mails and interactive runs show everything.
//!
//! See the `examples` dir. Start with [`TelemetryConfig::new()`].

use std::{
    io::Write as _,
    path::{Path, PathBuf},
};

use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{
    filter::filter_fn, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
    Layer as _,
};

mod syslog;

pub use syslog::SyslogLayer;

/// Default location of the local syslog socket.
pub const SYSLOG_SOCKET: &str = "/dev/log";

/// The toplevel config for the telemetry crate. Start here.
#[derive(Debug)]
pub struct TelemetryConfig {
    syslog_identifier: Option<String>,
    syslog_socket: PathBuf,
    global_filter: EnvFilter,
}

impl TelemetryConfig {
    #[expect(clippy::new_without_default, reason = "may add required args later")]
    #[must_use]
    pub fn new() -> Self {
        Self {
            syslog_identifier: None,
            syslog_socket: PathBuf::from(SYSLOG_SOCKET),
            global_filter: EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        }
    }

    /// Enables the system log, tagging entries with `syslog_identifier`.
    ///
    /// journald is preferred if its socket is reachable, otherwise the syslog socket is used. If
    /// neither works, a note is printed to stderr and only stdio logging remains.
    #[must_use]
    pub fn with_syslog(self, syslog_identifier: &str) -> Self {
        Self {
            syslog_identifier: Some(syslog_identifier.to_owned()),
            ..self
        }
    }

    /// Overrides the syslog socket path. Mostly useful for tests.
    #[must_use]
    pub fn with_syslog_socket(self, path: impl AsRef<Path>) -> Self {
        Self {
            syslog_socket: path.as_ref().to_owned(),
            ..self
        }
    }

    /// Override the global filter to a custom filter.
    #[must_use]
    pub fn with_global_filter(self, filter: EnvFilter) -> Self {
        Self {
            global_filter: filter,
            ..self
        }
    }

    pub fn try_init(
        self,
    ) -> Result<TelemetryFlusher, tracing_subscriber::util::TryInitError> {
        let (journald_layer, syslog_layer) = match self.syslog_identifier {
            None => (None, None),
            Some(identifier) => match tracing_journald::layer() {
                Ok(layer) => (Some(layer.with_syslog_identifier(identifier)), None),
                Err(_) => {
                    let syslog = SyslogLayer::connect(&self.syslog_socket, &identifier)
                        .inspect_err(|err| {
                            eprintln!(
                                "failed connecting to syslog socket at `{}`. will only \
                                 write to stdout/stderr: {err}",
                                self.syslog_socket.display(),
                            );
                        })
                        .ok();
                    (None, syslog)
                }
            },
        };

        let stdout_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stdout)
            .with_filter(filter_fn(|metadata| *metadata.level() > Level::WARN));
        let stderr_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::WARN);

        tracing_subscriber::registry()
            .with(journald_layer)
            .with(syslog_layer)
            .with(stdout_layer)
            .with(stderr_layer)
            .with(self.global_filter)
            .try_init()?;

        Ok(TelemetryFlusher { _private: () })
    }

    /// Initializes the telemetry config. Call this only once, at the beginning of the
    /// program.
    ///
    /// Calling this more than once or when another tracing subscriber is registered
    /// will cause a panic.
    pub fn init(self) -> TelemetryFlusher {
        self.try_init().expect("failed to initialize telemetry")
    }
}

/// Allows flushing all telemetry logs.
#[must_use = "call .flush_blocking at the end of the program to flush logs, otherwise they may get lost"]
pub struct TelemetryFlusher {
    _private: (),
}

impl TelemetryFlusher {
    /// Call this at the end of the program.
    pub fn flush_blocking(self) {
        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();
    }
}
