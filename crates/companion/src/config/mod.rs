//! File-backed settings for the companion and sync clients.
//! This module handles parsing and validation of the
//! ~/.config/docbridge/companion.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{CONFIG_PATH_ENV, default_config_path, load_config, load_config_from_path, save_config_to_path};
pub use model::{CompanionConfig, ConfigError, DEFAULT_COMPANION_URL, DEFAULT_SERVER_URL};
pub use validation::{ValidationError, validate_config};
