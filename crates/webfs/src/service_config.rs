use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Maximum request body size in bytes (500 MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    // http server configuration
    /// address the HTTP server binds to
    pub listen_addr: SocketAddr,
    /// request bodies larger than this are rejected
    pub max_body_bytes: usize,

    // store configuration
    /// directory exposed by the server
    pub store_root: PathBuf,
    /// where the private staging directory is created,
    ///  if not set then the system temp dir is used
    pub staging_parent: Option<PathBuf>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

/// Optional on-disk configuration, every key may be overridden by a flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub bind: Option<SocketAddr>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid Socket Address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),
    #[error("could not determine working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_file_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("webfs.toml");
        fs::write(
            &path,
            r#"
bind = "0.0.0.0:9000"
dir = "/srv/files"
verbose = true
"#,
        )
        .unwrap();

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.bind, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(config.dir, Some(PathBuf::from("/srv/files")));
        assert_eq!(config.verbose, Some(true));
        assert_eq!(config.staging_dir, None);
        assert_eq!(config.max_body_bytes, None);
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("webfs.toml");
        fs::write(&path, "colour = \"blue\"\n").unwrap();

        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            FileConfig::load(Path::new("/nonexistent/webfs.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
