use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_IDLE_SECS: u64 = 120;
pub const DEFAULT_LISTEN_BACKLOG: i32 = 256;
pub const DEFAULT_DATASERVICE_USER: &str = "pbsdata";

/// Process-wide configuration for the network core, loaded via `serdeconv`
/// the way `GameConfig::load` loads its TOML file in the teacher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Overrides the table capacity derived from the descriptor limit.
    /// `None` means "derive from `RLIMIT_NOFILE`".
    #[serde(default)]
    pub capacity_override: Option<usize>,
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,
    /// Path to the optional data-service username file, e.g.
    /// `pbs_home/server_priv/db_user`.
    #[serde(default)]
    pub db_user_path: Option<String>,
}

fn default_max_idle_secs() -> u64 {
    DEFAULT_MAX_IDLE_SECS
}

fn default_listen_backlog() -> i32 {
    DEFAULT_LISTEN_BACKLOG
}

impl Default for CoreConfig {
    fn default() -> CoreConfig {
        CoreConfig {
            capacity_override: None,
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            db_user_path: None,
        }
    }
}

impl CoreConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CoreConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }
}

/// Reads the data-service username from `db_user_path`, grounded on
/// `pbs_get_dataservice_usr()`: a missing file is not an error and yields
/// the built-in default; an existing file that can't be read is.
pub fn read_dataservice_user(path: Option<&str>) -> Result<String, std::io::Error> {
    let path = match path {
        Some(path) => path,
        None => return Ok(DEFAULT_DATASERVICE_USER.to_string()),
    };

    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim_end_matches(['\r', '\n']).to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DEFAULT_DATASERVICE_USER.to_string()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_builtin_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_idle_secs, DEFAULT_MAX_IDLE_SECS);
        assert_eq!(config.listen_backlog, DEFAULT_LISTEN_BACKLOG);
        assert!(config.capacity_override.is_none());
    }

    #[test]
    fn missing_db_user_file_yields_builtin_default() {
        assert_eq!(
            read_dataservice_user(Some("/nonexistent/path/to/db_user")).unwrap(),
            DEFAULT_DATASERVICE_USER
        );
    }

    #[test]
    fn no_path_yields_builtin_default() {
        assert_eq!(read_dataservice_user(None).unwrap(), DEFAULT_DATASERVICE_USER);
    }

    #[test]
    fn reads_and_trims_trailing_newline_from_file() {
        let dir = std::env::temp_dir().join(format!("netcore-dbuser-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("db_user");
        fs::write(&file_path, "customuser\n").unwrap();
        assert_eq!(read_dataservice_user(Some(file_path.to_str().unwrap())).unwrap(), "customuser");
        let _ = fs::remove_dir_all(&dir);
    }
}
