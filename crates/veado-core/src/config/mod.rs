mod dirs;
mod settings;

pub use dirs::{default_config_path, default_instances_dir};
pub use settings::{ClientConfig, ConnectionConfig};
