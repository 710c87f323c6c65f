//! Demo configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which traffic Node4 generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Alternate a notification to Node1 with a broadcast.
    Broadcast,
    /// Round-robin async indications over Node1..Node3.
    Indication,
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "broadcast" | "notify" => Ok(Scenario::Broadcast),
            "indication" | "async" => Ok(Scenario::Indication),
            other => Err(format!("unknown demo mode: {other}")),
        }
    }
}

/// Logging setup for the demo binary.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive (trace, debug, info, `ebus=debug`, ...)
    pub filter: String,

    /// Include the event target in each line
    pub with_target: bool,

    /// Include the tokio worker thread id
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EBUS_LOG` or `RUST_LOG`: filter directive (default: info)
    /// - `EBUS_LOG_TARGET`: show event targets (default: true)
    /// - `EBUS_LOG_THREADS`: show thread ids (default: false)
    pub fn from_env() -> Self {
        Self {
            filter: env::var("EBUS_LOG")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            with_target: env::var("EBUS_LOG_TARGET")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            with_thread_ids: env::var("EBUS_LOG_THREADS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Traffic generator settings.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub scenario: Scenario,

    /// Period of Node4's send loop
    pub interval: Duration,

    /// Period of every node's mailbox poll
    pub poll: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::Broadcast,
            interval: Duration::from_millis(1000),
            poll: Duration::from_millis(10),
        }
    }
}

impl DemoConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EBUS_DEMO_MODE`: broadcast | indication (default: broadcast)
    /// - `EBUS_DEMO_INTERVAL_MS`: send period (default: 1000)
    /// - `EBUS_DEMO_POLL_MS`: mailbox poll period (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scenario: env::var("EBUS_DEMO_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.scenario),

            interval: env::var("EBUS_DEMO_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),

            poll: env::var("EBUS_DEMO_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll),
        }
    }
}
