use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Directory veadotube writes one descriptor file per running instance to
const INSTANCES_SUBDIR: [&str; 2] = [".veadotube", "instances"];

/// `~/.veadotube/instances`, or a relative `.veadotube/instances` when the
/// home directory cannot be determined.
#[must_use]
pub fn default_instances_dir() -> PathBuf {
    let base = BaseDirs::new().map_or_else(PathBuf::new, |dirs| dirs.home_dir().to_path_buf());
    INSTANCES_SUBDIR.iter().fold(base, |path, part| path.join(part))
}

/// `config.json` in the platform config directory for `veado`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "veado").map(|project| project.config_dir().join("config.json"))
}
