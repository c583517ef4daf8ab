//! Engine configuration.
//!
//! All tunables live in one [`GuardianConfig`] constructed at process start
//! and held by the engine — there is no ambient mutable global state.
//! Precedence is "most specific wins": built-in defaults, then environment
//! overrides via [`GuardianConfig::from_env`], then explicit builder calls.

use std::time::Duration;

/// Configuration for the safety-monitoring engine.
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    /// Minimum displacement for a location update to count as movement
    /// (meters). Updates below this with no anomaly flag are discarded to
    /// prevent GPS-noise handover flapping.
    pub jitter_threshold_m: f64,
    /// How long to wait for a subject's safety response before
    /// auto-escalating.
    pub escalation_timeout: Duration,
    /// False-alarm window after a "safe" response, during which further
    /// anomaly signals are ignored. On expiry the stage returns to Normal.
    pub cooldown: Duration,
    /// Heartbeat sweep period.
    pub heartbeat_period: Duration,
    /// Silence longer than this from a monitored session counts as signal
    /// loss.
    pub signal_loss_timeout: Duration,
    /// Interval between retry-queue delivery attempts.
    pub retry_interval: Duration,
    /// Retry queue capacity. At capacity the oldest record is dropped with a
    /// logged warning rather than growing without bound.
    pub retry_queue_capacity: usize,
    /// External incident-management endpoint (POST target).
    pub incident_endpoint: String,
    /// Static API key sent as the `x-api-key` header.
    pub api_key: String,
    /// Request timeout for a single delivery attempt.
    pub delivery_timeout: Duration,
    /// Broadcast channel capacity for outbound notifications.
    pub notification_capacity: usize,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            jitter_threshold_m: 5.0,
            escalation_timeout: Duration::from_secs(60),
            cooldown: Duration::from_secs(15),
            heartbeat_period: Duration::from_secs(5),
            signal_loss_timeout: Duration::from_secs(15),
            retry_interval: Duration::from_secs(10),
            retry_queue_capacity: 256,
            incident_endpoint: "http://localhost:8081/api/incidents".to_string(),
            api_key: String::new(),
            delivery_timeout: Duration::from_secs(5),
            notification_capacity: 1024,
        }
    }
}

impl GuardianConfig {
    /// Create a new configuration builder.
    pub fn builder() -> GuardianConfigBuilder {
        GuardianConfigBuilder::default()
    }

    /// Defaults with environment-variable overrides applied.
    ///
    /// Recognized variables: `GUARDIAN_INCIDENT_ENDPOINT`,
    /// `GUARDIAN_API_KEY`, `GUARDIAN_SIGNAL_LOSS_SECS`,
    /// `GUARDIAN_ESCALATION_SECS`, `GUARDIAN_COOLDOWN_SECS`,
    /// `GUARDIAN_JITTER_METERS`, `GUARDIAN_RETRY_SECS`.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("GUARDIAN_INCIDENT_ENDPOINT") {
            config.incident_endpoint = url;
        }
        if let Ok(key) = std::env::var("GUARDIAN_API_KEY") {
            config.api_key = key;
        }
        if let Some(secs) = parse_env_u64("GUARDIAN_SIGNAL_LOSS_SECS") {
            config.signal_loss_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("GUARDIAN_ESCALATION_SECS") {
            config.escalation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("GUARDIAN_COOLDOWN_SECS") {
            config.cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("GUARDIAN_RETRY_SECS") {
            config.retry_interval = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("GUARDIAN_JITTER_METERS") {
            match raw.parse::<f64>() {
                Ok(m) if m >= 0.0 => config.jitter_threshold_m = m,
                _ => tracing::warn!(value = %raw, "ignoring invalid GUARDIAN_JITTER_METERS"),
            }
        }

        config
    }
}

fn parse_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring invalid duration override");
            None
        }
    }
}

/// Builder for [`GuardianConfig`].
#[derive(Debug, Default)]
pub struct GuardianConfigBuilder {
    config: GuardianConfig,
}

impl GuardianConfigBuilder {
    /// Set the jitter threshold in meters (clamped to be non-negative).
    pub fn jitter_threshold_m(mut self, meters: f64) -> Self {
        self.config.jitter_threshold_m = meters.max(0.0);
        self
    }

    /// Set the escalation-response timeout.
    pub fn escalation_timeout(mut self, timeout: Duration) -> Self {
        self.config.escalation_timeout = timeout;
        self
    }

    /// Set the post-"safe" cooldown duration.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    /// Set the heartbeat sweep period.
    pub fn heartbeat_period(mut self, period: Duration) -> Self {
        self.config.heartbeat_period = period;
        self
    }

    /// Set the signal-loss timeout.
    pub fn signal_loss_timeout(mut self, timeout: Duration) -> Self {
        self.config.signal_loss_timeout = timeout;
        self
    }

    /// Set the retry interval.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Set the retry queue capacity (minimum 1).
    pub fn retry_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.retry_queue_capacity = capacity.max(1);
        self
    }

    /// Set the incident-management endpoint URL.
    pub fn incident_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.incident_endpoint = url.into();
        self
    }

    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    /// Set the per-attempt delivery timeout.
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GuardianConfig {
        self.config
    }
}
