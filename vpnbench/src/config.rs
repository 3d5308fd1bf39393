//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `VPNBENCH_*`
//! environment variables (after loading `.env`), command-line flags.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpnbench_speedtest::SpeedtestOptions;

use crate::{
    custody::DEFAULT_CONFIG_SUBDIR,
    store::DEFAULT_RESULTS_PREFIX,
    transport::SocksEndpoint,
};

/// Install location of the AdGuard VPN CLI.
pub const DEFAULT_VPN_BINARY: &str = "/opt/adguardvpn_cli/adguardvpn-cli";
/// Log file name prefix.
pub const DEFAULT_LOG_PREFIX: &str = "adguard_speedtest";
/// Per-request timeout of the speed test.
pub const DEFAULT_MEASURE_TIMEOUT: Duration = Duration::from_secs(30);
/// Looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "vpnbench.toml";

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named config file is absent.
    #[error("config file {} does not exist", path.display())]
    MissingConfig {
        /// The named path.
        path: PathBuf,
    },
    /// The config file could not be read.
    #[error("failed to read config file {}", path.display())]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Read failure.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for [`FileConfig`].
    #[error("failed to parse config file {}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: toml::de::Error,
    },
    /// A duration setting is not humantime syntax.
    #[error("invalid duration for {key}: '{value}'")]
    Duration {
        /// Setting name.
        key: &'static str,
        /// Value as given.
        value: String,
        /// Parse failure.
        #[source]
        source: humantime::DurationError,
    },
    /// The `.env` file exists but could not be parsed.
    #[error("failed to load environment file")]
    EnvFile(#[from] dotenvy::Error),
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// AdGuard VPN CLI executable.
    pub vpn_binary: PathBuf,
    /// Local SOCKS5 listener of the VPN client.
    pub socks: SocksEndpoint,
    /// Directory holding result CSVs.
    pub results_dir: PathBuf,
    /// Result file name prefix.
    pub results_prefix: String,
    /// Directory for per-run log files.
    pub log_dir: PathBuf,
    /// Log file name prefix.
    pub log_prefix: String,
    /// VPN CLI state directory, relative to a home directory.
    pub config_subdir: PathBuf,
    /// Per-request timeout of the speed test.
    pub measure_timeout: Duration,
    /// Use https for speedtest server URLs.
    pub secure: bool,
    /// Upper bound for every VPN CLI invocation; `None` waits forever.
    pub command_timeout: Option<Duration>,
    /// Issue `config set-mode socks` before discovery.
    pub set_socks_mode: bool,
    /// Write the per-run log file in addition to stdout.
    pub log_file: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            vpn_binary: PathBuf::from(DEFAULT_VPN_BINARY),
            socks: SocksEndpoint::default(),
            results_dir: PathBuf::from("."),
            results_prefix: DEFAULT_RESULTS_PREFIX.to_string(),
            log_dir: PathBuf::from("."),
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            config_subdir: PathBuf::from(DEFAULT_CONFIG_SUBDIR),
            measure_timeout: DEFAULT_MEASURE_TIMEOUT,
            secure: true,
            command_timeout: None,
            set_socks_mode: true,
            log_file: true,
        }
    }
}

impl BenchConfig {
    /// Options for the measurement client.
    pub fn speedtest_options(&self) -> SpeedtestOptions {
        SpeedtestOptions {
            timeout: self.measure_timeout,
            secure: self.secure,
            ..SpeedtestOptions::default()
        }
    }

    /// `<log_dir>/<log_prefix>_<stamp>.log`.
    pub fn log_path(&self, stamp: &str) -> PathBuf {
        self.log_dir.join(format!("{}_{stamp}.log", self.log_prefix))
    }
}

/// Raw configuration as written in a TOML file. Durations are humantime
/// strings (`"30s"`, `"2m"`).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// See [`BenchConfig::vpn_binary`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpn_binary: Option<PathBuf>,
    /// SOCKS listener host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_host: Option<String>,
    /// SOCKS listener port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_port: Option<u16>,
    /// See [`BenchConfig::results_dir`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_dir: Option<PathBuf>,
    /// See [`BenchConfig::results_prefix`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_prefix: Option<String>,
    /// See [`BenchConfig::log_dir`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// See [`BenchConfig::log_prefix`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_prefix: Option<String>,
    /// See [`BenchConfig::config_subdir`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_subdir: Option<PathBuf>,
    /// Humantime duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_timeout: Option<String>,
    /// See [`BenchConfig::secure`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    /// Humantime duration, or `none`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<String>,
    /// See [`BenchConfig::set_socks_mode`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_socks_mode: Option<bool>,
    /// See [`BenchConfig::log_file`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<bool>,
}

impl FileConfig {
    /// Read and parse a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// Config file named by the environment.
    pub config_path: Option<PathBuf>,
    /// See [`BenchConfig::vpn_binary`].
    pub vpn_binary: Option<PathBuf>,
    /// SOCKS listener host.
    pub socks_host: Option<String>,
    /// SOCKS listener port.
    pub socks_port: Option<u16>,
    /// See [`BenchConfig::results_dir`].
    pub results_dir: Option<PathBuf>,
    /// See [`BenchConfig::results_prefix`].
    pub results_prefix: Option<String>,
    /// See [`BenchConfig::log_dir`].
    pub log_dir: Option<PathBuf>,
    /// See [`BenchConfig::log_prefix`].
    pub log_prefix: Option<String>,
    /// See [`BenchConfig::config_subdir`].
    pub config_subdir: Option<PathBuf>,
    /// Humantime duration.
    pub measure_timeout: Option<String>,
    /// See [`BenchConfig::secure`].
    pub secure: Option<bool>,
    /// Humantime duration, or `none`.
    pub command_timeout: Option<String>,
    /// See [`BenchConfig::set_socks_mode`].
    pub set_socks_mode: Option<bool>,
    /// See [`BenchConfig::log_file`].
    pub log_file: Option<bool>,
}

impl EnvConfig {
    /// Read `VPNBENCH_*` from the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read `VPNBENCH_*` through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |name| lookup(name).map(PathBuf::from);
        let flag = |name| lookup(name).and_then(|raw| parse_bool(&raw));
        Self {
            config_path: path("VPNBENCH_CONFIG"),
            vpn_binary: path("VPNBENCH_VPN_BINARY"),
            socks_host: lookup("VPNBENCH_SOCKS_HOST"),
            socks_port: lookup("VPNBENCH_SOCKS_PORT")
                .and_then(|s| s.parse().ok()),
            results_dir: path("VPNBENCH_RESULTS_DIR"),
            results_prefix: lookup("VPNBENCH_RESULTS_PREFIX"),
            log_dir: path("VPNBENCH_LOG_DIR"),
            log_prefix: lookup("VPNBENCH_LOG_PREFIX"),
            config_subdir: path("VPNBENCH_CONFIG_SUBDIR"),
            measure_timeout: lookup("VPNBENCH_MEASURE_TIMEOUT"),
            secure: flag("VPNBENCH_SECURE"),
            command_timeout: lookup("VPNBENCH_COMMAND_TIMEOUT"),
            set_socks_mode: flag("VPNBENCH_SET_SOCKS_MODE"),
            log_file: flag("VPNBENCH_LOG_FILE"),
        }
    }
}

/// Values supplied on the command line; `None` defers to lower layers.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// `--vpn-binary`
    pub vpn_binary: Option<PathBuf>,
    /// `--socks-host`
    pub socks_host: Option<String>,
    /// `--socks-port`
    pub socks_port: Option<u16>,
    /// `--results-dir`
    pub results_dir: Option<PathBuf>,
    /// `--log-dir`
    pub log_dir: Option<PathBuf>,
    /// `--measure-timeout`
    pub measure_timeout: Option<Duration>,
    /// `--command-timeout`
    pub command_timeout: Option<Duration>,
    /// `--insecure`: keep plain http.
    pub insecure: bool,
    /// `--skip-socks-mode`
    pub skip_socks_mode: bool,
    /// `--no-log-file`
    pub no_log_file: bool,
}

/// Composes [`BenchConfig`] from its layers.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Loader using `./vpnbench.toml` and `./.env` when present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require this config file instead of the default lookup.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load this environment file instead of `./.env`.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Load `.env`, read the process environment and compose.
    pub fn load(&self, cli: &CliOverrides) -> Result<BenchConfig, ConfigError> {
        let loaded = match &self.env_file {
            Some(path) => dotenvy::from_path(path),
            None => dotenvy::dotenv().map(drop),
        };
        match loaded {
            Ok(()) | Err(dotenvy::Error::Io(_)) => {}
            Err(err) => return Err(err.into()),
        }
        self.load_with_env(EnvConfig::gather(), cli)
    }

    /// Compose from an already gathered environment layer.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        cli: &CliOverrides,
    ) -> Result<BenchConfig, ConfigError> {
        let file = self.load_file_config(&env)?.unwrap_or_default();
        compose(file, env, cli)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<Option<FileConfig>, ConfigError> {
        let explicit = self.config_path.as_ref().or(env.config_path.as_ref());
        match explicit {
            Some(path) if !path.exists() => {
                Err(ConfigError::MissingConfig { path: path.clone() })
            }
            Some(path) => FileConfig::from_path(path).map(Some),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    FileConfig::from_path(fallback).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    cli: &CliOverrides,
) -> Result<BenchConfig, ConfigError> {
    let defaults = BenchConfig::default();

    let measure_timeout = match cli.measure_timeout {
        Some(limit) => limit,
        None => env
            .measure_timeout
            .or(file.measure_timeout)
            .map(|raw| parse_duration("measure_timeout", &raw))
            .transpose()?
            .unwrap_or(defaults.measure_timeout),
    };

    let command_timeout = match cli.command_timeout {
        Some(limit) => Some(limit),
        None => match env.command_timeout.or(file.command_timeout) {
            Some(raw) => parse_optional_duration("command_timeout", &raw)?,
            None => defaults.command_timeout,
        },
    };

    let secure = !cli.insecure
        && env.secure.or(file.secure).unwrap_or(defaults.secure);
    let set_socks_mode = !cli.skip_socks_mode
        && env
            .set_socks_mode
            .or(file.set_socks_mode)
            .unwrap_or(defaults.set_socks_mode);
    let log_file = !cli.no_log_file
        && env.log_file.or(file.log_file).unwrap_or(defaults.log_file);

    Ok(BenchConfig {
        vpn_binary: cli
            .vpn_binary
            .clone()
            .or(env.vpn_binary)
            .or(file.vpn_binary)
            .unwrap_or(defaults.vpn_binary),
        socks: SocksEndpoint {
            host: cli
                .socks_host
                .clone()
                .or(env.socks_host)
                .or(file.socks_host)
                .unwrap_or(defaults.socks.host),
            port: cli
                .socks_port
                .or(env.socks_port)
                .or(file.socks_port)
                .unwrap_or(defaults.socks.port),
        },
        results_dir: cli
            .results_dir
            .clone()
            .or(env.results_dir)
            .or(file.results_dir)
            .unwrap_or(defaults.results_dir),
        results_prefix: env
            .results_prefix
            .or(file.results_prefix)
            .unwrap_or(defaults.results_prefix),
        log_dir: cli
            .log_dir
            .clone()
            .or(env.log_dir)
            .or(file.log_dir)
            .unwrap_or(defaults.log_dir),
        log_prefix: env
            .log_prefix
            .or(file.log_prefix)
            .unwrap_or(defaults.log_prefix),
        config_subdir: env
            .config_subdir
            .or(file.config_subdir)
            .unwrap_or(defaults.config_subdir),
        measure_timeout,
        secure,
        command_timeout,
        set_socks_mode,
        log_file,
    })
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ConfigError::Duration {
        key,
        value: raw.to_string(),
        source,
    })
}

/// Like [`parse_duration`], but `none`, `off` and `0` disable the limit.
fn parse_optional_duration(
    key: &'static str,
    raw: &str,
) -> Result<Option<Duration>, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "off" | "0" => Ok(None),
        _ => parse_duration(key, raw).map(Some),
    }
}

/// Accepted truthy values (case-insensitive): `1`, `true`, `yes`, `on`.
/// Accepted falsy values: `0`, `false`, `no`, `off`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| vars.get(name).cloned())
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vpnbench.toml");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_match_the_adguard_layout() {
        let config = compose(
            FileConfig::default(),
            EnvConfig::default(),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.vpn_binary, Path::new(DEFAULT_VPN_BINARY));
        assert_eq!(config.socks, SocksEndpoint::new("127.0.0.1", 1080));
        assert_eq!(config.command_timeout, None);
        assert_eq!(
            config.log_path("20240101_120000"),
            Path::new("./adguard_speedtest_20240101_120000.log")
        );
    }

    #[test]
    fn layers_apply_in_order() {
        let (_dir, path) = write_config(
            r#"
            socks_port = 1081
            socks_host = "10.0.0.2"
            results_prefix = "from_file"
            measure_timeout = "45s"
            command_timeout = "2m"
            "#,
        );
        let cli = CliOverrides {
            socks_host: Some("192.168.1.1".into()),
            ..CliOverrides::default()
        };
        let env = env(&[
            ("VPNBENCH_SOCKS_PORT", "1090"),
            ("VPNBENCH_MEASURE_TIMEOUT", "1m 30s"),
        ]);

        let config = ConfigLoader::new()
            .with_config_path(&path)
            .load_with_env(env, &cli)
            .unwrap();
        assert_eq!(config.socks, SocksEndpoint::new("192.168.1.1", 1090));
        assert_eq!(config.results_prefix, "from_file");
        assert_eq!(config.measure_timeout, Duration::from_secs(90));
        assert_eq!(config.command_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn cli_switches_turn_features_off() {
        let cli = CliOverrides {
            insecure: true,
            skip_socks_mode: true,
            no_log_file: true,
            ..CliOverrides::default()
        };
        let config = compose(
            FileConfig::default(),
            env(&[("VPNBENCH_SECURE", "yes")]),
            &cli,
        )
        .unwrap();
        assert!(!config.secure);
        assert!(!config.set_socks_mode);
        assert!(!config.log_file);
        assert!(!config.speedtest_options().secure);
    }

    #[test]
    fn command_timeout_can_be_disabled() {
        let file = FileConfig {
            command_timeout: Some("5m".into()),
            ..FileConfig::default()
        };
        let config = compose(
            file,
            env(&[("VPNBENCH_COMMAND_TIMEOUT", "off")]),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.command_timeout, None);
    }

    #[test]
    fn bad_duration_names_the_key() {
        let err = compose(
            FileConfig::default(),
            env(&[("VPNBENCH_MEASURE_TIMEOUT", "soon")]),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Duration { key: "measure_timeout", .. }),
            "{err:?}"
        );
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::new()
            .with_config_path("/nonexistent/vpnbench.toml")
            .load_with_env(EnvConfig::default(), &CliOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfig { .. }));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let (_dir, path) = write_config("sock_port = 1080\n");
        let err = FileConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_config_path_is_honoured() {
        let (_dir, path) = write_config("vpn_binary = \"/usr/bin/adguardvpn-cli\"\n");
        let env = env(&[("VPNBENCH_CONFIG", path.to_str().unwrap())]);
        let config = ConfigLoader::new()
            .load_with_env(env, &CliOverrides::default())
            .unwrap();
        assert_eq!(config.vpn_binary, Path::new("/usr/bin/adguardvpn-cli"));
    }

    #[test]
    fn parses_env_style_booleans() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
