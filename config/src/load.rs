use std::path::{Path, PathBuf};

use rust_cli_config::File;
use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory containing configuration files relative to the application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    /// Failed to determine the runtime environment.
    #[error("failed to load the runtime environment: {0}")]
    Environment(#[source] std::io::Error),

    /// The configured `configuration` directory does not exist.
    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    /// The underlying config library failed to build or deserialize.
    #[error(transparent)]
    Config(#[from] rust_cli_config::ConfigError),
}

/// Loads configuration by layering files and environment variables.
///
/// Settings are merged in order of increasing precedence: `base.yaml`, the
/// `<environment>.yaml` override file, then `APP__`-prefixed environment
/// variables (`APP_TARGET__HOST` overrides `target.host`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let configuration_dir = base_path.join(CONFIGURATION_DIR);
    if !configuration_dir.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_dir,
        ));
    }

    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    let settings = builder_with_files(&configuration_dir, &environment)
        .add_source(
            rust_cli_config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR),
        )
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

fn builder_with_files(
    configuration_dir: &Path,
    environment: &Environment,
) -> ConfigBuilder<DefaultState> {
    let environment_file = format!("{environment}.yaml");

    rust_cli_config::Config::builder()
        .add_source(File::from(configuration_dir.join("base.yaml")).required(false))
        .add_source(File::from(configuration_dir.join(environment_file)).required(false))
}
