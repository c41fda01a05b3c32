//! Settings inspection command

use hwl_core::config::toml_config::{self, TomlConfig};
use hwl_core::error::{ConfigError, HwlError};

/// Print the settings the supervisor would run with
///
/// With `init`, a missing config file is first created from those settings.
pub fn show_config(json: bool, init: bool) -> Result<i32, HwlError> {
    let config = toml_config::load_config()?;
    let source = toml_config::get_config_path()?;

    if init {
        if toml_config::config_exists()? {
            eprintln!("Config file already exists at {}", source.display());
        } else {
            let written = toml_config::save_config(&config)?;
            eprintln!("Wrote {}", written.display());
        }
    }

    if json {
        let rendered = serde_json::to_string_pretty(&config).map_err(|e| {
            HwlError::Config(ConfigError::ValidationError {
                message: format!("Failed to serialize settings: {}", e),
            })
        })?;
        println!("{}", rendered);
    } else {
        if toml_config::config_exists()? {
            println!("# Loaded from {}", source.display());
        } else {
            println!("# Defaults ({} not found)", source.display());
        }
        print!("{}", toml::to_string_pretty(&TomlConfig::new(config))?);
    }

    Ok(0)
}
