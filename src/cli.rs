use crate::config::{Config, ConfigError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub struct Opts {
    /// Read configuration from the given TOML file.
    #[structopt(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overrides `server.address`.
    #[structopt(short, long)]
    pub address: Option<SocketAddr>,

    /// Maximum number of concurrently processed requests, overrides `admission.limit`.
    #[structopt(short, long)]
    pub limit: Option<usize>,

    /// Seconds to wait for active requests on shutdown, overrides
    /// `admission.shutdown_timeout_secs`.
    #[structopt(long)]
    pub shutdown_timeout_secs: Option<u64>,

    /// Enable more detailed internal logging. Repeat to increase level.
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further.
    #[structopt(short, long, parse(from_occurrences))]
    pub quiet: u8,

    /// Set the logging format.
    #[structopt(long, default_value = "text", possible_values = &["text", "json"])]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    #[structopt(long, default_value = "auto", possible_values = &["auto", "always", "never"])]
    pub color: Color,
}

impl Opts {
    pub fn log_level(&self) -> &'static str {
        match self.quiet {
            0 => match self.verbose {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }

    /// Loads the config file, if any, and applies the command line overrides.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(address) = self.address {
            config.server.address = address;
        }
        if let Some(limit) = self.limit {
            config.admission.limit = limit;
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            config.admission.shutdown_timeout_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

impl Color {
    pub fn use_color(&self) -> bool {
        match self {
            Color::Auto => atty::is(atty::Stream::Stdout),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Color::Auto),
            "always" => Ok(Color::Always),
            "never" => Ok(Color::Never),
            s => Err(format!(
                "{} is not a valid option, expected `auto`, `always` or `never`",
                s
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            s => Err(format!(
                "{} is not a valid option, expected `text` or `json`",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_line_overrides_defaults() {
        let opts = Opts::from_iter(&[
            "admission-gate",
            "--limit",
            "8",
            "--address",
            "0.0.0.0:9000",
            "--shutdown-timeout-secs",
            "1",
        ]);

        let config = opts.load_config().unwrap();
        assert_eq!(config.admission.limit, 8);
        assert_eq!(config.admission.shutdown_timeout_secs, 1);
        assert_eq!(
            config.server.address,
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn zero_limit_flag_is_rejected() {
        let opts = Opts::from_iter(&["admission-gate", "--limit", "0"]);
        assert!(matches!(
            opts.load_config(),
            Err(ConfigError::InvalidLimit { limit: 0 })
        ));
    }

    #[test]
    fn verbosity_flags_pick_log_level() {
        let level = |args: &[&str]| Opts::from_iter(args).log_level();
        assert_eq!(level(&["admission-gate"]), "info");
        assert_eq!(level(&["admission-gate", "-vv"]), "trace");
        assert_eq!(level(&["admission-gate", "-q"]), "warn");
        assert_eq!(level(&["admission-gate", "-qqq"]), "off");
    }
}
