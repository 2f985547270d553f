use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    BackendConfig, CleanupConfig, LoadConfig, MarkerConfig, MonitorConfig, MySqlConnectionConfig,
    MySqlConnectionConfigWithoutSecrets, ProbeConfig, ReadinessConfig, SchemaConfig, TlsConfig,
    ValidationError,
};

/// Complete configuration of a harness invocation.
#[derive(Clone, Debug, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_source")]
    pub source: MySqlConnectionConfig,
    #[serde(default = "default_target")]
    pub target: MySqlConnectionConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_source() -> MySqlConnectionConfig {
    MySqlConnectionConfig {
        host: "localhost".to_string(),
        port: 3306,
        name: "source_db".to_string(),
        username: "cdc_user".to_string(),
        password: Some(SecretString::new("cdc_pass123".to_string())),
        tls: TlsConfig::disabled(),
        minimal_session: false,
    }
}

fn default_target() -> MySqlConnectionConfig {
    MySqlConnectionConfig {
        host: "localhost".to_string(),
        port: 9030,
        name: "cdc_db".to_string(),
        username: "root".to_string(),
        password: None,
        tls: TlsConfig::disabled(),
        minimal_session: true,
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
            backend: BackendConfig::default(),
            readiness: ReadinessConfig::default(),
            probe: ProbeConfig::default(),
            load: LoadConfig::default(),
            markers: MarkerConfig::default(),
            cleanup: CleanupConfig::default(),
            schema: SchemaConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Validates every section, returning the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.target.validate()?;
        self.readiness.validate()?;
        self.probe.validate()?;
        self.load.validate()?;
        self.cleanup.validate()?;
        self.monitor.validate()?;

        if self.markers.prefix.is_empty() {
            return Err(ValidationError::EmptyMarkerPrefix);
        }

        Ok(())
    }
}

impl Config for BenchConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["cleanup.marker_prefixes"];
}

/// Loggable view of [`BenchConfig`] without passwords.
#[derive(Clone, Debug, Serialize)]
pub struct BenchConfigWithoutSecrets {
    pub source: MySqlConnectionConfigWithoutSecrets,
    pub target: MySqlConnectionConfigWithoutSecrets,
    pub backend: BackendConfig,
    pub readiness: ReadinessConfig,
    pub probe: ProbeConfig,
    pub load: LoadConfig,
    pub markers: MarkerConfig,
    pub cleanup: CleanupConfig,
    pub schema: SchemaConfig,
    pub monitor: MonitorConfig,
}

impl From<BenchConfig> for BenchConfigWithoutSecrets {
    fn from(value: BenchConfig) -> Self {
        Self {
            source: value.source.into(),
            target: value.target.into(),
            backend: value.backend,
            readiness: value.readiness,
            probe: value.probe,
            load: value.load,
            markers: value.markers,
            cleanup: value.cleanup,
            schema: value.schema,
            monitor: value.monitor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(BenchConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: BenchConfig = serde_json::from_str(
            r#"{
                "probe": { "max_wait_secs": 30 },
                "backend": { "kind": "memory", "replication_delay_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.probe.max_wait_secs, 30);
        assert_eq!(config.probe.check_interval_ms, 1000);
        assert_eq!(config.load.batch_size, 100);
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.target.port, 9030);
        assert_eq!(
            config.backend.memory_delay(),
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(config.cleanup.marker_prefixes, vec!["cdcb_".to_string()]);
    }

    #[test]
    fn max_wait_shorter_than_poll_interval_is_rejected() {
        let mut config = BenchConfig::default();
        config.probe.max_wait_secs = 1;
        config.probe.check_interval_ms = 5000;

        assert_eq!(
            config.validate(),
            Err(ValidationError::MaxWaitBelowCheckInterval {
                max_wait_ms: 1000,
                check_interval_ms: 5000,
            })
        );
    }

    #[test]
    fn zero_workers_and_bad_rates_are_rejected() {
        let mut config = BenchConfig::default();
        config.load.workers = 0;
        assert_eq!(config.validate(), Err(ValidationError::Zero("load.workers")));

        for rate in [-1.0, f64::NAN, f64::INFINITY, 1e-19] {
            let mut config = BenchConfig::default();
            config.load.rate = rate;
            assert!(
                matches!(config.validate(), Err(ValidationError::InvalidRate(_))),
                "{rate}"
            );
        }

        let mut config = BenchConfig::default();
        config.load.rate = 0.0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn empty_cleanup_prefix_is_rejected() {
        let mut config = BenchConfig::default();
        config.cleanup.marker_prefixes.push(String::new());
        assert_eq!(config.validate(), Err(ValidationError::EmptyMarkerPrefix));
    }
}
