//! Run configuration, session timing and transport limits.
//!
//! A [`TestConfig`] is built once at process start (defaults, then an
//! optional TOML file, then command-line flags), validated, and shared
//! read-only by every virtual user for the lifetime of the run.
//!
//! # Example TOML
//!
//! ```toml
//! target = "ws://localhost:8583"
//! virtual_users = 10
//! duration = "1m"
//! ack_marker = "ACK"
//!
//! [session]
//! hold = "5s"
//! ping_interval = "1s"
//! pacing = "1s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::{Host, Url};

use crate::error::ConfigError;

/// Target used when neither the command line nor a config file names one.
pub const DEFAULT_TARGET: &str = "ws://localhost:8583";

/// Upper bound for every duration setting. Deadlines are computed by adding
/// these to the current instant, which must not overflow.
pub const MAX_SETTING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Transport limits for a single connection.
///
/// These bound the memory a misbehaving server can make a virtual user hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the handshake response head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Validate that a reassembled message is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that the handshake head read so far is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timing of one iteration's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    /// How long a connection stays open before it is closed.
    ///
    /// Default: 5 seconds
    pub hold: Duration,

    /// Interval between `ping` events while the connection is open.
    ///
    /// Default: 1 second
    pub ping_interval: Duration,

    /// Delay between closing a connection and starting the next iteration.
    ///
    /// Default: 1 second
    pub pacing: Duration,

    /// How long to wait for the server's close frame after sending ours.
    ///
    /// Default: 1 second
    pub close_timeout: Duration,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            pacing: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl SessionPlan {
    /// Create a plan with custom values.
    #[must_use]
    pub const fn new(
        hold: Duration,
        ping_interval: Duration,
        pacing: Duration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            hold,
            ping_interval,
            pacing,
            close_timeout,
        }
    }
}

/// A parsed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    secure: bool,
    host: String,
    port: u16,
    resource: String,
    host_header: String,
}

impl Target {
    /// Parse a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTarget`] if the URL does not parse, has
    /// no host, or its scheme is not `ws` or `wss`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            url: input.to_string(),
            reason,
        };

        let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(invalid(format!(
                    "unsupported scheme '{other}', expected ws or wss"
                )));
            }
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host".into())),
        };

        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut resource = url.path().to_string();
        if resource.is_empty() {
            resource.push('/');
        }
        if let Some(query) = url.query() {
            resource.push('?');
            resource.push_str(query);
        }

        // host_str() keeps IPv6 brackets, which the Host header needs
        let authority = url.host_str().unwrap_or(host.as_str()).to_string();
        let host_header = match url.port() {
            Some(explicit) => format!("{authority}:{explicit}"),
            None => authority,
        };

        Ok(Self {
            url,
            secure,
            host,
            port,
            resource,
            host_header,
        })
    }

    /// `true` for `wss://`.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Host to resolve and connect to (IPv6 without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, defaulting to 80 / 443.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request target for the upgrade request (path plus query).
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Value for the `Host` header.
    #[must_use]
    pub fn host_header(&self) -> &str {
        &self.host_header
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Complete configuration of a load test run.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Endpoint every virtual user connects to.
    pub target: Target,

    /// Number of concurrent virtual users.
    ///
    /// Default: 10
    pub virtual_users: u32,

    /// Wall-clock length of the run. No iteration starts after it elapses.
    ///
    /// Default: 1 minute
    pub duration: Duration,

    /// Per-iteration session timing.
    pub session: SessionPlan,

    /// Substring every server message is checked for.
    ///
    /// Default: `"ACK"`
    pub ack_marker: String,

    /// `message` field of the `hello` event sent on open.
    ///
    /// Default: `"from wsload"`
    pub hello_message: String,

    /// Limit for establishing the transport connection (TCP and TLS).
    ///
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Limit for the HTTP upgrade exchange.
    ///
    /// Default: 10 seconds
    pub handshake_timeout: Duration,

    /// Time open sessions get to close after an operator abort.
    ///
    /// Default: 5 seconds
    pub grace_period: Duration,

    /// Probe the target once before starting virtual users.
    ///
    /// Default: true
    pub preflight: bool,

    /// Number of error messages kept in the summary. Further errors are
    /// only counted.
    ///
    /// Default: 1000
    pub max_recorded_errors: usize,

    /// Transport limits.
    pub limits: Limits,
}

impl TestConfig {
    /// Create a configuration for `target` with default settings.
    #[must_use]
    pub fn new(target: Target) -> Self {
        Self {
            target,
            virtual_users: 10,
            duration: Duration::from_secs(60),
            session: SessionPlan::default(),
            ack_marker: "ACK".to_string(),
            hello_message: "from wsload".to_string(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            grace_period: Duration::from_secs(5),
            preflight: true,
            max_recorded_errors: 1000,
            limits: Limits::default(),
        }
    }

    /// Set the number of virtual users.
    #[must_use]
    pub const fn with_virtual_users(mut self, virtual_users: u32) -> Self {
        self.virtual_users = virtual_users;
        self
    }

    /// Set the run duration.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the session timing.
    #[must_use]
    pub fn with_session(mut self, session: SessionPlan) -> Self {
        self.session = session;
        self
    }

    /// Set the acknowledgment marker.
    #[must_use]
    pub fn with_ack_marker(mut self, marker: impl Into<String>) -> Self {
        self.ack_marker = marker.into();
        self
    }

    /// Set the grace period for forced shutdown.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Enable or disable the preflight probe.
    #[must_use]
    pub const fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    /// Set the connect and handshake timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, handshake: Duration) -> Self {
        self.connect_timeout = connect;
        self.handshake_timeout = handshake;
        self
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.virtual_users == 0 {
            return Err(ConfigError::NoVirtualUsers);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }

        let non_zero = [
            ("hold", self.session.hold),
            ("ping interval", self.session.ping_interval),
            ("connect timeout", self.connect_timeout),
            ("handshake timeout", self.handshake_timeout),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: "must be greater than zero".into(),
                });
            }
        }

        let bounded = [
            ("duration", self.duration),
            ("hold", self.session.hold),
            ("ping interval", self.session.ping_interval),
            ("pacing", self.session.pacing),
            ("close timeout", self.session.close_timeout),
            ("connect timeout", self.connect_timeout),
            ("handshake timeout", self.handshake_timeout),
            ("grace period", self.grace_period),
        ];
        for (name, value) in bounded {
            if value > MAX_SETTING {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: format!("must not exceed {}", humantime::format_duration(MAX_SETTING)),
                });
            }
        }

        if self.ack_marker.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "ack marker",
                reason: "must not be empty".into(),
            });
        }

        if self.target.is_secure() && !cfg!(feature = "tls-rustls") {
            return Err(ConfigError::InvalidTarget {
                url: self.target.to_string(),
                reason: "wss:// requires the tls-rustls feature".into(),
            });
        }

        Ok(())
    }
}

/// Session section of a config file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFile {
    /// See [`SessionPlan::hold`].
    #[serde(default, with = "humantime_serde")]
    pub hold: Option<Duration>,
    /// See [`SessionPlan::ping_interval`].
    #[serde(default, with = "humantime_serde")]
    pub ping_interval: Option<Duration>,
    /// See [`SessionPlan::pacing`].
    #[serde(default, with = "humantime_serde")]
    pub pacing: Option<Duration>,
    /// See [`SessionPlan::close_timeout`].
    #[serde(default, with = "humantime_serde")]
    pub close_timeout: Option<Duration>,
}

/// Settings read from a TOML config file. Every field is optional; absent
/// fields keep their defaults and command-line flags override present ones.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Target URL.
    pub target: Option<String>,
    /// Number of virtual users.
    pub virtual_users: Option<u32>,
    /// Run duration, e.g. `"1m"`.
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    /// Acknowledgment marker.
    pub ack_marker: Option<String>,
    /// `hello` event message.
    pub hello_message: Option<String>,
    /// Transport connect timeout.
    #[serde(default, with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Upgrade handshake timeout.
    #[serde(default, with = "humantime_serde")]
    pub handshake_timeout: Option<Duration>,
    /// Forced-shutdown grace period.
    #[serde(default, with = "humantime_serde")]
    pub grace_period: Option<Duration>,
    /// Preflight probe toggle.
    pub preflight: Option<bool>,
    /// Cap on recorded error messages.
    pub max_recorded_errors: Option<usize>,
    /// Session timing.
    #[serde(default)]
    pub session: SessionFile,
}

impl FileConfig {
    /// Read and parse a TOML config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileRead`] if the file cannot be read,
    /// [`ConfigError::FileParse`] if it is not a valid config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| ConfigError::FileParse {
            path: path.display().to_string(),
            reason,
        })
    }

    fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Overlay the present fields onto `config`. The target is not applied;
    /// it is resolved before the config is created.
    pub fn apply(&self, config: &mut TestConfig) {
        if let Some(vus) = self.virtual_users {
            config.virtual_users = vus;
        }
        if let Some(duration) = self.duration {
            config.duration = duration;
        }
        if let Some(marker) = &self.ack_marker {
            config.ack_marker = marker.clone();
        }
        if let Some(message) = &self.hello_message {
            config.hello_message = message.clone();
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = self.handshake_timeout {
            config.handshake_timeout = timeout;
        }
        if let Some(grace) = self.grace_period {
            config.grace_period = grace;
        }
        if let Some(preflight) = self.preflight {
            config.preflight = preflight;
        }
        if let Some(max) = self.max_recorded_errors {
            config.max_recorded_errors = max;
        }
        if let Some(hold) = self.session.hold {
            config.session.hold = hold;
        }
        if let Some(interval) = self.session.ping_interval {
            config.session.ping_interval = interval;
        }
        if let Some(pacing) = self.session.pacing {
            config.session.pacing = pacing;
        }
        if let Some(timeout) = self.session.close_timeout {
            config.session.close_timeout = timeout;
        }
    }
}
