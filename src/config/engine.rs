use serde::{Deserialize, Serialize};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::errors::ConfigValidationError;

use super::{AsciiConfig, HttpConfig, LoggingConfig, MasterConfig, RtuConfig, TcpConfig};

/// Top-level engine configuration: one section per transport plus the
/// ambient master timeouts, HTTP side-channel, and logging setup.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub tcp: TcpConfig,
    pub rtu: RtuConfig,
    pub ascii: AsciiConfig,
    pub master: MasterConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub const CONFIG_DIR: &'static str = "config";
    const ENV_PREFIX: &'static str = "MODBUS";

    /// Builds configuration with the following precedence (highest to
    /// lowest): environment variables (`MODBUS_*`) > `config/local.yaml` >
    /// `config/{RUN_MODE}.yaml` > `config/default.yaml` > built-in defaults.
    pub fn new() -> Result<Self, ConfigValidationError> {
        let environment = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let defaults = EngineConfig::default();

        let builder = ConfigBuilder::builder()
            .set_default("tcp.bind_addr", defaults.tcp.bind_addr)?
            .set_default("tcp.bind_port", defaults.tcp.bind_port)?
            .set_default(
                "tcp.keep_alive",
                format!("{}s", defaults.tcp.keep_alive.as_secs()),
            )?
            .set_default("tcp.any_unit_id", defaults.tcp.any_unit_id as i64)?
            .set_default("rtu.device", defaults.rtu.device)?
            .set_default("rtu.baud_rate", defaults.rtu.baud_rate)?
            .set_default("rtu.data_bits", defaults.rtu.data_bits.to_string())?
            .set_default("rtu.parity", defaults.rtu.parity.to_string())?
            .set_default("rtu.stop_bits", defaults.rtu.stop_bits.to_string())?
            .set_default("rtu.rts_type", defaults.rtu.rts_type.to_string())?
            .set_default("rtu.rts_delay_us", defaults.rtu.rts_delay_us)?
            .set_default("rtu.flush_after_write", defaults.rtu.flush_after_write)?
            .set_default("rtu.max_frame_size", defaults.rtu.max_frame_size as i64)?
            .set_default("ascii.device", defaults.ascii.device)?
            .set_default("ascii.baud_rate", defaults.ascii.baud_rate)?
            .set_default("ascii.data_bits", defaults.ascii.data_bits.to_string())?
            .set_default("ascii.parity", defaults.ascii.parity.to_string())?
            .set_default("ascii.stop_bits", defaults.ascii.stop_bits.to_string())?
            .set_default(
                "master.default_timeout",
                format!("{}s", defaults.master.default_timeout.as_secs()),
            )?
            .set_default(
                "master.device_id_timeout",
                format!("{}s", defaults.master.device_id_timeout.as_secs()),
            )?
            .set_default("http.enabled", defaults.http.enabled)?
            .set_default("http.bind_addr", defaults.http.bind_addr)?
            .set_default("http.bind_port", defaults.http.bind_port)?
            .set_default("http.metrics_enabled", defaults.http.metrics_enabled)?
            .set_default("logging.log_dir", defaults.logging.log_dir)?
            .set_default("logging.trace_frames", defaults.logging.trace_frames)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default("logging.include_location", defaults.logging.include_location)?
            .set_default("logging.thread_ids", defaults.logging.thread_ids)?
            .set_default("logging.thread_names", defaults.logging.thread_names)?
            .add_source(File::new(
                &format!("{}/default", Self::CONFIG_DIR),
                FileFormat::Yaml,
            ).required(false))
            .add_source(
                File::new(
                    &format!("{}/{}", Self::CONFIG_DIR, environment),
                    FileFormat::Yaml,
                )
                .required(false),
            )
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: std::path::PathBuf) -> Result<Self, ConfigValidationError> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = builder.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.tcp.bind_addr.is_empty() {
            return Err(ConfigValidationError::tcp("bind address must not be empty"));
        }
        if self.tcp.bind_port == 0 {
            return Err(ConfigValidationError::tcp("bind port must be non-zero"));
        }
        if self.tcp.keep_alive.is_zero() {
            return Err(ConfigValidationError::tcp("keep_alive must be non-zero"));
        }

        if self.rtu.device.is_empty() {
            return Err(ConfigValidationError::rtu("device must not be empty"));
        }
        if self.rtu.baud_rate == 0 {
            return Err(ConfigValidationError::rtu("baud rate must be non-zero"));
        }
        if self.rtu.max_frame_size == 0 {
            return Err(ConfigValidationError::rtu("max frame size must be non-zero"));
        }

        if self.ascii.device.is_empty() {
            return Err(ConfigValidationError::ascii("device must not be empty"));
        }
        if self.ascii.baud_rate == 0 {
            return Err(ConfigValidationError::ascii("baud rate must be non-zero"));
        }
        if self.rtu.device == self.ascii.device {
            return Err(ConfigValidationError::ascii(
                "device must differ from the RTU transport's device",
            ));
        }

        if self.master.default_timeout.is_zero() {
            return Err(ConfigValidationError::master("default_timeout must be non-zero"));
        }
        if self.master.device_id_timeout.is_zero() {
            return Err(ConfigValidationError::master(
                "device_id_timeout must be non-zero",
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigValidationError::logging("invalid log level")),
        }
        match self.logging.format.to_lowercase().as_str() {
            "pretty" | "json" => {}
            _ => return Err(ConfigValidationError::logging("invalid log format")),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    #[serial_test::serial]
    fn default_config_validates() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial_test::serial]
    fn env_override_applies() {
        std::env::set_var("MODBUS_TCP__BIND_PORT", "5020");
        let config = EngineConfig::new().unwrap();
        assert_eq!(config.tcp.bind_port, 5020);
        std::env::remove_var("MODBUS_TCP__BIND_PORT");
    }

    #[test]
    #[serial_test::serial]
    fn file_config_loads() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        fs::write(
            &config_path,
            r#"
            tcp:
              bind_addr: "192.168.1.100"
              bind_port: 9000
              keep_alive: "30s"
              any_unit_id: 248
            rtu:
              device: "/dev/ttyUSB0"
              baud_rate: 19200
              data_bits: 8
              parity: "none"
              stop_bits: "one"
              rts_type: "down"
              rts_delay_us: 3500
              flush_after_write: true
              max_frame_size: 256
            ascii:
              device: "/dev/ttyUSB1"
              baud_rate: 9600
              data_bits: 7
              parity: "even"
              stop_bits: "one"
            master:
              default_timeout: "2s"
              device_id_timeout: "4s"
            http:
              enabled: false
              bind_addr: "192.168.1.100"
              bind_port: 9080
              metrics_enabled: false
            logging:
              log_dir: "logs"
              trace_frames: false
              level: "trace"
              format: "pretty"
              include_location: false
              thread_ids: false
              thread_names: true
            "#,
        )
        .unwrap();

        let config = EngineConfig::from_file(config_path).unwrap();
        assert_eq!(config.tcp.bind_port, 9000);
        assert_eq!(config.tcp.keep_alive, Duration::from_secs(30));
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.ascii.baud_rate, 9600);
        assert!(!config.http.enabled);
    }

    #[test]
    #[serial_test::serial]
    fn zero_port_fails_validation() {
        std::env::set_var("MODBUS_TCP__BIND_PORT", "0");
        assert!(EngineConfig::new().is_err());
        std::env::remove_var("MODBUS_TCP__BIND_PORT");
    }
}
