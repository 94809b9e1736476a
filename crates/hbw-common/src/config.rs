//! Configuration structures for the heartbeat watchdog.
//!
//! Supports TOML deserialization with defaults matching the reference
//! timing (500 ms timeout, 100 ms producer period, 10 ms watchdog poll).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum tolerated silence between heartbeats.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Period at which the producer publishes a heartbeat.
    #[serde(with = "humantime_serde")]
    pub producer_period: Duration,

    /// Period at which the watchdog polls the heartbeat store.
    #[serde(with = "humantime_serde")]
    pub watchdog_period: Duration,

    /// Action taken when the heartbeat expires.
    pub stop_action: StopAction,

    /// Process exit code used by [`StopAction::Exit`].
    pub exit_code: i32,

    /// Producer fault injection.
    pub fault_injection: FaultInjectionConfig,

    /// Real-time configuration for the two monitor threads.
    pub realtime: RealtimeConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_millis(500),
            producer_period: Duration::from_millis(100),
            watchdog_period: Duration::from_millis(10),
            stop_action: StopAction::Abort,
            exit_code: 70, // EX_SOFTWARE
            fault_injection: FaultInjectionConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

/// What the emergency stop does after printing its diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopAction {
    /// Abort the process (SIGABRT).
    #[default]
    Abort,
    /// Exit the process with `exit_code`.
    Exit,
}

impl fmt::Display for StopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

impl std::str::FromStr for StopAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "exit" => Ok(Self::Exit),
            other => Err(ConfigError::Invalid(format!(
                "unknown stop action '{other}' (expected 'abort' or 'exit')"
            ))),
        }
    }
}

/// Producer fault injection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    /// Stall the producer permanently, simulating a hang.
    pub simulate_hang: bool,

    /// How long the producer runs normally before stalling.
    /// Zero stalls before the first heartbeat is stored.
    #[serde(with = "humantime_serde")]
    pub hang_after: Duration,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            simulate_hang: false,
            hang_after: Duration::ZERO,
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Enable real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo", "rr" or "other".
    pub policy: SchedPolicy,

    /// Scheduler priority of the producer thread (1-99 for RT policies).
    pub producer_priority: u8,

    /// Scheduler priority of the watchdog thread. Should be above the producer.
    pub watchdog_priority: u8,

    /// CPU affinity applied to both monitor threads.
    pub cpu_affinity: CpuAffinity,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Fail at startup if any RT setting cannot be applied.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            producer_priority: 80,
            watchdog_priority: 90,
            cpu_affinity: CpuAffinity::None,
            lock_memory: true,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
    /// SCHED_OTHER: Normal time-sharing (non-RT).
    Other,
}

/// CPU affinity specification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CpuAffinity {
    /// No affinity set (OS chooses).
    #[default]
    None,
    /// Pin to a single CPU core.
    Single(usize),
    /// Pin to a set of CPU cores.
    Set(Vec<usize>),
}

impl Serialize for CpuAffinity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            CpuAffinity::None => serializer.serialize_none(),
            CpuAffinity::Single(cpu) => serializer.serialize_u64(*cpu as u64),
            CpuAffinity::Set(cpus) => cpus.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CpuAffinity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct CpuAffinityVisitor;

        impl<'de> Visitor<'de> for CpuAffinityVisitor {
            type Value = CpuAffinity;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("null, an integer, or an array of integers")
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(CpuAffinity::None)
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index out of range"))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                usize::try_from(value)
                    .map(CpuAffinity::Single)
                    .map_err(|_| de::Error::custom("CPU index cannot be negative"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut cpus = Vec::new();
                while let Some(cpu) = seq.next_element::<usize>()? {
                    cpus.push(cpu);
                }
                Ok(CpuAffinity::Set(cpus))
            }
        }

        deserializer.deserialize_any(CpuAffinityVisitor)
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    ///
    /// The result is not validated; call [`MonitorConfig::validate`] after
    /// applying any overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check the timing relationships the watchdog relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when:
    /// - any period or the timeout is zero
    /// - the watchdog period exceeds half the timeout (detection latency
    ///   would no longer be bounded by `timeout + poll`)
    /// - the producer period is not shorter than the timeout (steady state
    ///   would trip the watchdog)
    /// - `exit_code` is outside `1..=255` (the exit stop would look like a
    ///   clean shutdown once truncated to a status byte)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout must be non-zero".into(),
            ));
        }
        if self.producer_period.is_zero() || self.watchdog_period.is_zero() {
            return Err(ConfigError::Invalid(
                "producer_period and watchdog_period must be non-zero".into(),
            ));
        }
        if self.watchdog_period.saturating_mul(2) > self.heartbeat_timeout {
            return Err(ConfigError::Invalid(format!(
                "watchdog_period ({}) must be at most half of heartbeat_timeout ({})",
                humantime::format_duration(self.watchdog_period),
                humantime::format_duration(self.heartbeat_timeout),
            )));
        }
        if self.producer_period >= self.heartbeat_timeout {
            return Err(ConfigError::Invalid(format!(
                "producer_period ({}) must be shorter than heartbeat_timeout ({})",
                humantime::format_duration(self.producer_period),
                humantime::format_duration(self.heartbeat_timeout),
            )));
        }
        if !(1..=255).contains(&self.exit_code) {
            return Err(ConfigError::Invalid(format!(
                "exit_code ({}) must be in 1..=255",
                self.exit_code
            )));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Values parsed but are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(500));
        assert_eq!(config.producer_period, Duration::from_millis(100));
        assert_eq!(config.watchdog_period, Duration::from_millis(10));
        assert_eq!(config.stop_action, StopAction::Abort);
        assert!(!config.fault_injection.simulate_hang);
        assert!(!config.realtime.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            heartbeat_timeout = "250ms"
            producer_period = "50ms"
            watchdog_period = "5ms"
            stop_action = "exit"
            exit_code = 3

            [fault_injection]
            simulate_hang = true
            hang_after = "1s"

            [realtime]
            enabled = true
            watchdog_priority = 95
            policy = "rr"
            cpu_affinity = [2, 3]
        "#;

        let config = MonitorConfig::from_toml(toml).unwrap();
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(250));
        assert_eq!(config.producer_period, Duration::from_millis(50));
        assert_eq!(config.watchdog_period, Duration::from_millis(5));
        assert_eq!(config.stop_action, StopAction::Exit);
        assert_eq!(config.exit_code, 3);
        assert!(config.fault_injection.simulate_hang);
        assert_eq!(config.fault_injection.hang_after, Duration::from_secs(1));
        assert!(config.realtime.enabled);
        assert_eq!(config.realtime.policy, SchedPolicy::Rr);
        assert_eq!(config.realtime.watchdog_priority, 95);
        // Unset fields keep their defaults
        assert_eq!(config.realtime.producer_priority, 80);
        assert_eq!(config.realtime.cpu_affinity, CpuAffinity::Set(vec![2, 3]));
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let example = include_str!("../../../config/hbw.example.toml");
        let config = MonitorConfig::from_toml(example).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result = MonitorConfig::from_toml(r#"heartbeat_timeout = "soon""#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_cpu_affinity_variants() {
        let single: CpuAffinity = serde_json::from_str("3").unwrap();
        assert_eq!(single, CpuAffinity::Single(3));

        let set: CpuAffinity = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(set, CpuAffinity::Set(vec![1, 2, 3]));

        let none: CpuAffinity = serde_json::from_str("null").unwrap();
        assert_eq!(none, CpuAffinity::None);

        assert!(serde_json::from_str::<CpuAffinity>("-1").is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = MonitorConfig::default();
        config.fault_injection.simulate_hang = true;
        config.fault_injection.hang_after = Duration::from_millis(300);
        let toml = config.to_toml().unwrap();
        let parsed = MonitorConfig::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_stop_action_from_str() {
        assert_eq!("abort".parse::<StopAction>().unwrap(), StopAction::Abort);
        assert_eq!("EXIT".parse::<StopAction>().unwrap(), StopAction::Exit);
        assert!("reboot".parse::<StopAction>().is_err());
    }

    #[test]
    fn test_validate_rejects_slow_watchdog() {
        let config = MonitorConfig {
            watchdog_period: Duration::from_millis(300),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watchdog_period"));

        // Exactly half the timeout is still accepted
        let config = MonitorConfig {
            watchdog_period: Duration::from_millis(250),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_slow_producer() {
        let config = MonitorConfig {
            producer_period: Duration::from_millis(500),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("producer_period"));
    }

    #[test]
    fn test_validate_rejects_success_exit_code() {
        for code in [0, 256, 512, -1] {
            let config = MonitorConfig {
                stop_action: StopAction::Exit,
                exit_code: code,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("exit_code"), "{code}: {err}");
        }

        for code in [1, 70, 255] {
            let config = MonitorConfig {
                exit_code: code,
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "{code} should be accepted");
        }
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = MonitorConfig {
            heartbeat_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MonitorConfig {
            watchdog_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
