use std::env;
use std::path::{Path, PathBuf};

/// Database location configuration.
///
/// Reads from the `NIGHTSHIFT_DATA_DIR` environment variable, falling back to
/// `~/.nightshift` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory holding the database file and the daemon lock file.
    pub data_dir: PathBuf,
}

impl DbConfig {
    /// Build a config from the environment.
    ///
    /// Priority: `NIGHTSHIFT_DATA_DIR` env var, then `~/.nightshift`, then
    /// `.nightshift` in the current directory as a last resort.
    pub fn from_env() -> Self {
        let data_dir = env::var("NIGHTSHIFT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".nightshift"))
                    .unwrap_or_else(|| PathBuf::from(".nightshift"))
            });
        Self { data_dir }
    }

    /// Build a config with an explicit data directory (tests and CLI flags).
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("nightshift.db")
    }

    /// Path to the single-instance lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("nightshift.lock")
    }

    /// The data directory itself.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir() {
        let cfg = DbConfig::new("/tmp/ns-test");
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/ns-test/nightshift.db"));
        assert_eq!(cfg.lock_path(), PathBuf::from("/tmp/ns-test/nightshift.lock"));
    }

    #[test]
    fn db_and_lock_are_siblings() {
        let cfg = DbConfig::new("/var/lib/nightshift");
        assert_eq!(
            cfg.database_path().parent(),
            cfg.lock_path().parent()
        );
    }
}
