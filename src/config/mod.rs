mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;

pub use settings::{BrokerSettings, PartialSettings, Settings};

/// Prefix of the environment variables that override file settings, as in
/// `POPQUEUE__BROKER__DATA_DIR`.
pub const ENV_PREFIX: &str = "POPQUEUE";

/// Loads the configuration from `config/default` and the environment
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Same as `load_config`, reading the file at `file` (extension optional).
/// A missing file is not an error.
pub fn load_config_from(file: &str) -> Result<Settings> {
    let config = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_with_defaults())
}

#[cfg(test)]
mod tests;
