use crate::admission::AdmissionSettings;
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file {:?}: {}", path, source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not parse config: {}", source))]
    Parse { source: toml::de::Error },
    #[snafu(display("Invalid concurrency limit {}, must be at least 1.", limit))]
    InvalidLimit { limit: usize },
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

const fn default_work_ms() -> u64 {
    2000
}

#[derive(Clone, Debug, Derivative, Deserialize, PartialEq, Eq)]
#[derivative(Default)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    /// Address the HTTP front end listens on.
    #[serde(default = "default_address")]
    #[derivative(Default(value = "default_address()"))]
    pub address: SocketAddr,

    /// Simulated processing time of `/queue`.
    #[serde(default = "default_work_ms")]
    #[derivative(Default(value = "default_work_ms()"))]
    pub work_ms: u64,
}

impl ServerSettings {
    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(Read { path })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).context(Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limit = self.admission.limit;
        ensure!(limit > 0, InvalidLimit { limit });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.admission.limit, 3);
        assert_eq!(config.admission.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.address, "127.0.0.1:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.work(), Duration::from_millis(2000));
    }

    #[test]
    fn parses_all_fields() {
        let config = Config::from_toml(
            r#"
            [admission]
            limit = 10
            shutdown_timeout_secs = 30

            [server]
            address = "0.0.0.0:8080"
            work_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.admission.limit, 10);
        assert_eq!(config.admission.shutdown_timeout_secs, 30);
        assert_eq!(config.server.address, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.server.work_ms, 50);
    }

    #[test]
    fn rejects_zero_limit() {
        let error = Config::from_toml("[admission]\nlimit = 0\n").unwrap_err();
        assert!(matches!(error, ConfigError::InvalidLimit { limit: 0 }));
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = Config::from_toml("[admission]\nmax_users = 4\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn rejects_negative_limit() {
        let error = Config::from_toml("[admission]\nlimit = -1\n").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[admission]\nlimit = 7").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.admission.limit, 7);
        assert_eq!(config.server, ServerSettings::default());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
