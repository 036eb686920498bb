use std::str::FromStr;
use std::time::Duration;

use demix_pipeline::DispatcherConfig;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error(
        "STREAM_INACTIVITY_SECS ({inactivity_secs}) must be greater than \
         HEARTBEAT_INTERVAL_SECS ({heartbeat_secs})"
    )]
    InactivityWindowTooShort {
        inactivity_secs: u64,
        heartbeat_secs: u64,
    },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Timeout for non-streaming requests (default: 30 s).
    pub request_timeout: Duration,
    /// How long shutdown waits for open connections (default: 30 s).
    pub shutdown_timeout: Duration,
    /// Idle time before a stream receives a heartbeat (default: 30 s).
    pub heartbeat_interval: Duration,
    /// Idle time before a stream consumer is disconnected (default: 120 s).
    pub stream_inactivity: Duration,
    /// Frames buffered per stream subscriber (default: `64`).
    pub subscriber_buffer: usize,
    /// Delay between a job's terminal frame and closing its streams
    /// (default: 2000 ms).
    pub channel_close_grace: Duration,
    /// Engines allowed to run at once, `0` for unbounded (default: `0`).
    pub max_concurrent_jobs: usize,
    /// Age after which finished jobs are purged (default: 5 h).
    pub job_retention: Duration,
    /// Interval of the retention sweep (default: 300 s).
    pub retention_sweep_interval: Duration,
    /// Delay between simulated engine progress steps (default: 100 ms).
    pub simulated_step: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            stream_inactivity: Duration::from_secs(120),
            subscriber_buffer: 64,
            channel_close_grace: Duration::from_millis(2000),
            max_concurrent_jobs: 0,
            job_retention: Duration::from_secs(18_000),
            retention_sweep_interval: Duration::from_secs(300),
            simulated_step: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `HOST`                          | `0.0.0.0`               |
    /// | `PORT`                          | `3000`                  |
    /// | `CORS_ORIGINS`                  | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                    |
    /// | `HEARTBEAT_INTERVAL_SECS`       | `30`                    |
    /// | `STREAM_INACTIVITY_SECS`        | `120`                   |
    /// | `SUBSCRIBER_BUFFER`             | `64`                    |
    /// | `CHANNEL_CLOSE_GRACE_MS`        | `2000`                  |
    /// | `MAX_CONCURRENT_JOBS`           | `0` (unbounded)         |
    /// | `JOB_RETENTION_SECS`            | `18000`                 |
    /// | `RETENTION_SWEEP_INTERVAL_SECS` | `300`                   |
    /// | `SIMULATED_STEP_MS`             | `100`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);
        let port = parse(&lookup, "PORT", defaults.port, "a valid port number")?;

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let subscriber_buffer = parse(
            &lookup,
            "SUBSCRIBER_BUFFER",
            defaults.subscriber_buffer,
            "a positive integer",
        )?;
        if subscriber_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "SUBSCRIBER_BUFFER",
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }

        let config = Self {
            host,
            port,
            cors_origins,
            request_timeout: positive_secs(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
            shutdown_timeout: secs(&lookup, "SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?,
            heartbeat_interval: positive_secs(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            stream_inactivity: secs(&lookup, "STREAM_INACTIVITY_SECS", defaults.stream_inactivity)?,
            subscriber_buffer,
            channel_close_grace: millis(
                &lookup,
                "CHANNEL_CLOSE_GRACE_MS",
                defaults.channel_close_grace,
            )?,
            max_concurrent_jobs: parse(
                &lookup,
                "MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
                "a non-negative integer",
            )?,
            job_retention: secs(&lookup, "JOB_RETENTION_SECS", defaults.job_retention)?,
            retention_sweep_interval: positive_secs(
                &lookup,
                "RETENTION_SWEEP_INTERVAL_SECS",
                defaults.retention_sweep_interval,
            )?,
            simulated_step: millis(&lookup, "SIMULATED_STEP_MS", defaults.simulated_step)?,
        };

        if config.stream_inactivity <= config.heartbeat_interval {
            return Err(ConfigError::InactivityWindowTooShort {
                inactivity_secs: config.stream_inactivity.as_secs(),
                heartbeat_secs: config.heartbeat_interval.as_secs(),
            });
        }

        Ok(config)
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            close_grace: self.channel_close_grace,
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse(lookup, var, default.as_secs(), "a whole number of seconds").map(Duration::from_secs)
}

/// Like [`secs`], rejecting zero.
fn positive_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let value = secs(lookup, var, default)?;
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            var,
            expected: "a positive whole number of seconds",
            value: "0".to_string(),
        });
    }
    Ok(value)
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse(lookup, var, default, "a whole number of milliseconds").map(Duration::from_millis)
}
