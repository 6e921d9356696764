//! # Configuration Modules
//!
//! Resolution of the saver's runtime settings from the add-on options file,
//! environment variables and the command line, plus the registration lists
//! used by the bootstrap utility.

/// Options file, environment and command-line layering for the saver.
pub mod config_saver;

/// JSON registration lists published by the bootstrap utility.
pub mod config_registrations;

pub use config_registrations::{load_registrations, RegistrationEntry, RegistrationFileError};
pub use config_saver::{
    load_config, load_dotenv, load_options, resolve, AddonOptions, BrokerSettings, BrokerSource,
    CliArgs, ConfigError, SaverConfig,
};
