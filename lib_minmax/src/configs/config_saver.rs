//! # Saver Configuration
//!
//! Resolves the saver's identity and broker connection from three layers,
//! lowest precedence first:
//!
//! 1. the add-on options file (`/data/options.json` by default), either with
//!    explicit `mqtt_*` keys or with the supervisor-provided `mqtt` object;
//! 2. environment variables (after `.env` files are loaded);
//! 3. command-line arguments.
//!
//! Layers merge field by field; a value set in a higher layer wins.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_OPTIONS_PATH: &str = "/data/options.json";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read options file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed options file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no HomA system id configured (homa_system_id or --systemId)")]
    MissingSystemId,

    #[error("no MQTT broker configured and no internal MQTT service available")]
    NoBroker,
}

/// Command-line arguments, each one also settable from the environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(about = "Universal min/max saver for the HomA framework", version)]
pub struct CliArgs {
    /// Enable debug output.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// MQTT broker host.
    #[arg(long = "brokerHost", env = "MINMAX_BROKER_HOST")]
    pub broker_host: Option<String>,

    /// MQTT broker port.
    #[arg(long = "brokerPort", env = "MINMAX_BROKER_PORT")]
    pub broker_port: Option<u16>,

    /// MQTT user name.
    #[arg(long = "brokerUser", env = "MINMAX_BROKER_USER")]
    pub broker_user: Option<String>,

    /// MQTT password.
    #[arg(long = "brokerPassword", env = "MINMAX_BROKER_PASSWORD", hide_env_values = true)]
    pub broker_password: Option<String>,

    /// CA bundle enabling TLS towards the broker.
    #[arg(long = "caCerts", env = "MINMAX_CA_CERTS")]
    pub ca_certs: Option<PathBuf>,

    /// HomA system id of this saver, e.g. "123456-min-max-saver".
    #[arg(long = "systemId", env = "MINMAX_SYSTEM_ID")]
    pub system_id: Option<String>,

    /// Path of the add-on options file.
    #[arg(long = "options", env = "MINMAX_OPTIONS_PATH")]
    pub options_path: Option<PathBuf>,

    /// Directory for JSON log files; console only when unset.
    #[arg(long = "logDir", env = "MINMAX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Seconds to wait for the broker to accept the connection at startup.
    #[arg(long = "connectTimeout", env = "MINMAX_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,
}

/// The supervisor-provided broker description inside the options file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct InternalBroker {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub mqtt_ca_certs: Option<String>,
}

/// Contents of the add-on options file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AddonOptions {
    pub homa_system_id: Option<String>,
    pub debug: Option<bool>,
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_ca_certs: Option<String>,
    pub mqtt: Option<InternalBroker>,
}

/// Where the broker address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerSource {
    CommandLine,
    Configured,
    Internal,
}

impl fmt::Display for BrokerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrokerSource::CommandLine => "command line",
            BrokerSource::Configured => "configured",
            BrokerSource::Internal => "internal",
        })
    }
}

#[derive(Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_certs: Option<PathBuf>,
    pub client_id: String,
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .field("ca_certs", &self.ca_certs)
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SaverConfig {
    pub system_id: String,
    pub broker: BrokerSettings,
    pub broker_source: BrokerSource,
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
    pub connect_timeout: Duration,
}

/// One configuration source with every field optional.
#[derive(Debug, Clone, Default)]
struct Layer {
    system_id: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    ca_certs: Option<PathBuf>,
    source: Option<BrokerSource>,
    debug: Option<bool>,
    log_dir: Option<PathBuf>,
    connect_timeout_secs: Option<u64>,
}

impl Layer {
    // `other` overrides `self` for every field it sets.
    fn merge(self, other: Layer) -> Layer {
        Layer {
            system_id: other.system_id.or(self.system_id),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            ca_certs: other.ca_certs.or(self.ca_certs),
            source: other.source.or(self.source),
            debug: other.debug.or(self.debug),
            log_dir: other.log_dir.or(self.log_dir),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

impl From<&AddonOptions> for Layer {
    fn from(options: &AddonOptions) -> Self {
        let mut layer = Layer {
            system_id: non_empty(options.homa_system_id.as_ref()),
            debug: options.debug,
            ..Default::default()
        };

        if let (Some(host), Some(port)) = (&options.mqtt_host, options.mqtt_port) {
            layer.host = Some(host.clone());
            layer.port = Some(port);
            layer.username = non_empty(options.mqtt_user.as_ref());
            layer.password = non_empty(options.mqtt_password.as_ref());
            layer.ca_certs = non_empty(options.mqtt_ca_certs.as_ref()).map(PathBuf::from);
            layer.source = Some(BrokerSource::Configured);
        } else if let Some(internal) = &options.mqtt {
            layer.host = non_empty(internal.host.as_ref());
            layer.port = internal.port;
            layer.username = non_empty(internal.username.as_ref());
            layer.password = non_empty(internal.password.as_ref());
            layer.ca_certs = non_empty(internal.mqtt_ca_certs.as_ref()).map(PathBuf::from);
            layer.source = Some(BrokerSource::Internal);
        }
        layer
    }
}

impl From<&CliArgs> for Layer {
    fn from(args: &CliArgs) -> Self {
        let overrides_broker = args.broker_host.is_some() || args.broker_port.is_some();
        Layer {
            system_id: non_empty(args.system_id.as_ref()),
            host: non_empty(args.broker_host.as_ref()),
            port: args.broker_port,
            username: non_empty(args.broker_user.as_ref()),
            password: non_empty(args.broker_password.as_ref()),
            ca_certs: args.ca_certs.clone(),
            source: overrides_broker.then_some(BrokerSource::CommandLine),
            debug: args.debug.then_some(true),
            log_dir: args.log_dir.clone(),
            connect_timeout_secs: args.connect_timeout_secs,
        }
    }
}

/// Loads `.env` and the platform-specific `.env.linux` / `.env.windows`.
pub fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

/// Reads the options file; a missing file yields `Ok(None)`.
pub fn load_options(path: &Path) -> Result<Option<AddonOptions>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Merges the options file (if any) with the command line.
pub fn resolve(options: Option<&AddonOptions>, args: &CliArgs) -> Result<SaverConfig, ConfigError> {
    let base = options.map(Layer::from).unwrap_or_default();
    let layer = base.merge(Layer::from(args));

    let system_id = layer.system_id.ok_or(ConfigError::MissingSystemId)?;
    let (Some(host), Some(port)) = (layer.host, layer.port) else {
        return Err(ConfigError::NoBroker);
    };

    let broker = BrokerSettings {
        host,
        port,
        username: layer.username,
        password: layer.password,
        ca_certs: layer.ca_certs,
        client_id: format!("{}-{}", system_id, std::process::id()),
    };

    Ok(SaverConfig {
        system_id,
        broker,
        broker_source: layer.source.unwrap_or(BrokerSource::CommandLine),
        debug: layer.debug.unwrap_or(false),
        log_dir: layer.log_dir,
        connect_timeout: Duration::from_secs(
            layer
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        ),
    })
}

/// Loads the options file named by `args` (or the default path) and resolves
/// the final configuration.
pub fn load_config(args: &CliArgs) -> Result<SaverConfig, ConfigError> {
    let path = args
        .options_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OPTIONS_PATH));
    let options = load_options(&path)?;
    resolve(options.as_ref(), args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn options(json: serde_json::Value) -> AddonOptions {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn explicit_broker_keys_win_over_internal_service() {
        let opts = options(serde_json::json!({
            "homa_system_id": "123456-min-max-saver",
            "mqtt_host": "broker.lan",
            "mqtt_port": 8883,
            "mqtt_user": "homa",
            "mqtt_password": "secret",
            "mqtt_ca_certs": "/ssl/ca.pem",
            "mqtt": { "host": "core-mosquitto", "port": 1883 }
        }));
        let config = resolve(Some(&opts), &CliArgs::default()).unwrap();
        assert_eq!(config.system_id, "123456-min-max-saver");
        assert_eq!(config.broker.host, "broker.lan");
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.username.as_deref(), Some("homa"));
        assert_eq!(config.broker.ca_certs, Some(PathBuf::from("/ssl/ca.pem")));
        assert_eq!(config.broker_source, BrokerSource::Configured);
        assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    }

    #[test]
    fn falls_back_to_internal_broker() {
        let opts = options(serde_json::json!({
            "homa_system_id": "saver",
            "mqtt_host": "only-host-no-port",
            "mqtt_ca_certs": "",
            "mqtt": { "host": "core-mosquitto", "port": 1883, "username": "addons", "password": "pw" }
        }));
        let config = resolve(Some(&opts), &CliArgs::default()).unwrap();
        assert_eq!(config.broker.host, "core-mosquitto");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.password.as_deref(), Some("pw"));
        assert_eq!(config.broker.ca_certs, None);
        assert_eq!(config.broker_source, BrokerSource::Internal);
    }

    #[test]
    fn command_line_overrides_options_file() {
        let opts = options(serde_json::json!({
            "homa_system_id": "saver",
            "debug": false,
            "mqtt": { "host": "core-mosquitto", "port": 1883 }
        }));
        let args = CliArgs {
            debug: true,
            broker_port: Some(1884),
            connect_timeout_secs: Some(2),
            ..Default::default()
        };
        let config = resolve(Some(&opts), &args).unwrap();
        assert_eq!(config.broker.host, "core-mosquitto");
        assert_eq!(config.broker.port, 1884);
        assert_eq!(config.broker_source, BrokerSource::CommandLine);
        assert!(config.debug);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_pieces_are_fatal() {
        let no_broker = options(serde_json::json!({ "homa_system_id": "saver" }));
        assert!(matches!(
            resolve(Some(&no_broker), &CliArgs::default()),
            Err(ConfigError::NoBroker)
        ));

        let no_id = options(serde_json::json!({ "mqtt_host": "h", "mqtt_port": 1883 }));
        assert!(matches!(
            resolve(Some(&no_id), &CliArgs::default()),
            Err(ConfigError::MissingSystemId)
        ));

        assert!(matches!(
            resolve(None, &CliArgs::default()),
            Err(ConfigError::MissingSystemId)
        ));
    }

    #[test]
    fn command_line_alone_is_enough() {
        let args = CliArgs {
            system_id: Some("saver".into()),
            broker_host: Some("localhost".into()),
            broker_port: Some(1883),
            ..Default::default()
        };
        let config = resolve(None, &args).unwrap();
        assert_eq!(config.broker.host, "localhost");
        assert!(config.broker.client_id.starts_with("saver-"));
    }

    #[test]
    fn password_is_masked_in_debug_output() {
        let args = CliArgs {
            system_id: Some("saver".into()),
            broker_host: Some("localhost".into()),
            broker_port: Some(1883),
            broker_password: Some("hunter2".into()),
            ..Default::default()
        };
        let config = resolve(None, &args).unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("*****"));
    }

    #[test]
    fn options_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(load_options(&missing).unwrap().is_none());

        let good = dir.path().join("options.json");
        let mut file = fs::File::create(&good).unwrap();
        write!(file, r#"{{"homa_system_id": "saver", "mqtt_host": "h", "mqtt_port": 1883}}"#).unwrap();
        let loaded = load_options(&good).unwrap().unwrap();
        assert_eq!(loaded.homa_system_id.as_deref(), Some("saver"));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_options(&bad), Err(ConfigError::Json { .. })));
    }

    #[test]
    fn load_config_reads_the_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{"homa_system_id": "saver", "mqtt": {"host": "core-mosquitto", "port": 1883}}"#).unwrap();
        let args = CliArgs {
            options_path: Some(path),
            ..Default::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.broker.host, "core-mosquitto");
    }
}
