pub use clap::Parser;

use std::net::SocketAddr;
use std::path::PathBuf;

use webfs::service_config::{ConfigError, FileConfig, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_BODY_BYTES};
use webfs::ServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "webfs", version)]
#[command(about = "Expose a directory as a flat key-value store over HTTP")]
pub struct Args {
    /// IP address and port to listen on (default 127.0.0.1:8080)
    #[arg(short = 'b', long = "bind")]
    pub bind: Option<SocketAddr>,

    /// Directory to serve (default is the current directory)
    #[arg(short = 'd', long = "dir")]
    pub dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Where to create the private staging directory (default is the system
    /// temp dir). Must be on the same filesystem as the served directory.
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Reject request bodies larger than this many bytes
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Path to a TOML config file, flags take precedence over its values
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Merge flags, the optional config file and defaults, in that order.
    pub fn into_config(self) -> Result<ServiceConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let listen_addr = match self.bind.or(file.bind) {
            Some(addr) => addr,
            None => DEFAULT_LISTEN_ADDR.parse()?,
        };

        let store_root = match self.dir.or(file.dir) {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ConfigError::WorkingDir)?,
        };

        let verbose = self.verbose || file.verbose.unwrap_or(false);

        Ok(ServiceConfig {
            listen_addr,
            max_body_bytes: self
                .max_body_bytes
                .or(file.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            store_root,
            staging_parent: self.staging_dir.or(file.staging_dir),
            log_level: if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            },
            log_dir: self.log_dir.or(file.log_dir),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::parse_from(["webfs"]).into_config().unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.store_root, std::env::current_dir().unwrap());
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.staging_parent.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_short_flags() {
        let config = Args::parse_from(["webfs", "-b", "0.0.0.0:9000", "-d", "/srv/files", "-v"])
            .into_config()
            .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.store_root, PathBuf::from("/srv/files"));
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        assert!(Args::try_parse_from(["webfs", "-b", "not-an-address"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("webfs.toml");
        std::fs::write(
            &path,
            r#"
bind = "0.0.0.0:9000"
dir = "/srv/from-file"
staging_dir = "/srv/scratch"
max_body_bytes = 1024
verbose = true
"#,
        )
        .unwrap();

        let config = Args::parse_from([
            "webfs",
            "-c",
            path.to_str().unwrap(),
            "-d",
            "/srv/from-flag",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(config.store_root, PathBuf::from("/srv/from-flag"));
        assert_eq!(config.staging_parent, Some(PathBuf::from("/srv/scratch")));
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }
}
