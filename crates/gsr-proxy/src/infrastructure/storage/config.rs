//! Flat `key = value` configuration file.
//!
//! The file lives next to the game as `GSReplacement.ini`:
//!
//! ```text
//! # GameSpy Replacement Configuration
//! # Generated automatically
//! backend = Revora
//! loginServer = gpcm.gamespy.com
//! loginPort = 29900
//! ...
//! ```
//!
//! # Parsing rules
//!
//! - Blank lines and lines starting with `#` or `;` are ignored.
//! - Keys and values are trimmed; a line without `=` is skipped.
//! - A repeated key keeps its first position and takes the last value.
//! - Keys this crate does not know are kept and written back verbatim, so
//!   settings for other tools survive a rewrite.
//!
//! Comments are not preserved across a rewrite; the file always starts with
//! the two-line header.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gsr_core::domain::config::{
    DEFAULT_BACKEND, DEFAULT_CHAT_HOST, DEFAULT_CHAT_PORT, DEFAULT_LOGIN_HOST, DEFAULT_LOGIN_PORT,
    DEFAULT_MASTER_HOST, DEFAULT_MASTER_PORT, DEFAULT_NAT_HOST, DEFAULT_NAT_PORT,
};
use gsr_core::{BackendConfig, Endpoint, Role};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name used when no path is configured.
pub const DEFAULT_CONFIG_FILE: &str = "GSReplacement.ini";

const HEADER: [&str; 2] = [
    "# GameSpy Replacement Configuration",
    "# Generated automatically",
];

pub const KEY_BACKEND: &str = "backend";

/// Host and port keys per role.
const ENDPOINT_KEYS: [(Role, &str, &str); Role::COUNT] = [
    (Role::Login, "loginServer", "loginPort"),
    (Role::Chat, "chatServer", "chatPort"),
    (Role::Master, "masterServer", "masterPort"),
    (Role::Nat, "natNegServer", "natNegPort"),
];

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A port key holds something that is not a port number.
    #[error("invalid value {value:?} for {key}")]
    InvalidPort { key: String, value: String },
}

/// An ordered set of configuration entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    entries: Vec<(String, String)>,
}

impl Default for ConfigFile {
    /// The default Revora configuration.
    fn default() -> Self {
        let mut file = Self { entries: Vec::new() };
        file.set(KEY_BACKEND, DEFAULT_BACKEND);
        file.set("loginServer", DEFAULT_LOGIN_HOST);
        file.set("loginPort", DEFAULT_LOGIN_PORT.to_string());
        file.set("chatServer", DEFAULT_CHAT_HOST);
        file.set("chatPort", DEFAULT_CHAT_PORT.to_string());
        file.set("masterServer", DEFAULT_MASTER_HOST);
        file.set("masterPort", DEFAULT_MASTER_PORT.to_string());
        file.set("natNegServer", DEFAULT_NAT_HOST);
        file.set("natNegPort", DEFAULT_NAT_PORT.to_string());
        file
    }
}

impl ConfigFile {
    /// Parses file content.  Never fails; unusable lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut file = Self { entries: Vec::new() };
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    file.set(key.trim(), value.trim());
                }
                _ => debug!("config line {} ignored: {line:?}", number + 1),
            }
        }
        file
    }

    /// Reads and parses `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Loads `path`, or writes the default configuration there and returns
    /// it when the file does not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for read failures other than "not found", and for
    /// failures writing the defaults.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!("loaded configuration from {}", path.display());
                Ok(Self::parse(&text))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no configuration at {}; writing defaults", path.display());
                let file = Self::default();
                file.save(path)?;
                Ok(file)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the header and every entry to `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.render()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The file content [`save`](Self::save) writes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in HEADER {
            out.push_str(line);
            out.push('\n');
        }
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key`, keeping its position if it already exists.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Reads `key` as a port.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPort`] when the value is not in `1..=65535`.
    pub fn port(&self, key: &str) -> Result<Option<u16>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.parse::<u16>() {
            Ok(port) if port != 0 => Ok(Some(port)),
            _ => Err(ConfigError::InvalidPort {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// The backend configuration these entries describe.
    ///
    /// Missing keys take their defaults; unusable ports are logged and
    /// replaced by the default for that key.
    pub fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::default();
        if let Some(backend) = self.get(KEY_BACKEND).filter(|b| !b.is_empty()) {
            config.backend = backend.to_string();
        }

        for (role, host_key, port_key) in ENDPOINT_KEYS {
            let endpoint = config.endpoint_mut(role);
            if let Some(host) = self.get(host_key).filter(|h| !h.is_empty()) {
                endpoint.host = host.to_string();
            }
            match self.port(port_key) {
                Ok(Some(port)) => endpoint.port = port,
                Ok(None) => {}
                Err(e) => warn!("{e}; using default port {}", endpoint.port),
            }
        }
        config
    }

    /// Stores `config` into the entries, keeping unrelated keys.
    pub fn set_backend_config(&mut self, config: &BackendConfig) {
        self.set(KEY_BACKEND, config.backend.as_str());
        for (role, host_key, port_key) in ENDPOINT_KEYS {
            let Endpoint { host, port } = config.endpoint(role);
            self.set(host_key, host.as_str());
            self.set(port_key, port.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gsr_test_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn test_parse_skips_comments_and_trims() {
        // Arrange
        let text = "# comment\n; other comment\n\n  backend =  Revora  \nloginPort=1234\nnot a pair\n";

        // Act
        let file = ConfigFile::parse(text);

        // Assert
        assert_eq!(file.get("backend"), Some("Revora"));
        assert_eq!(file.get("loginPort"), Some("1234"));
        assert_eq!(file.entries().count(), 2);
    }

    #[test]
    fn test_value_may_contain_equals_sign() {
        let file = ConfigFile::parse("motd = a=b\n");
        assert_eq!(file.get("motd"), Some("a=b"));
    }

    #[test]
    fn test_backend_config_reads_every_endpoint() {
        // Arrange
        let file = ConfigFile::parse(
            "backend = OpenSpy\nloginServer = login.example\nloginPort = 1\n\
             chatServer = chat.example\nchatPort = 2\nmasterServer = master.example\n\
             masterPort = 3\nnatNegServer = nat.example\nnatNegPort = 4\n",
        );

        // Act
        let config = file.backend_config();

        // Assert
        assert_eq!(config.backend, "OpenSpy");
        assert_eq!(config.login, Endpoint::new("login.example", 1));
        assert_eq!(config.chat, Endpoint::new("chat.example", 2));
        assert_eq!(config.master, Endpoint::new("master.example", 3));
        assert_eq!(config.nat, Endpoint::new("nat.example", 4));
    }

    #[test]
    fn test_bad_port_falls_back_to_default() {
        let file = ConfigFile::parse("masterPort = lots\nnatNegPort = 70000\nloginPort = 0\n");

        let config = file.backend_config();

        assert_eq!(config.master.port, DEFAULT_MASTER_PORT);
        assert_eq!(config.nat.port, DEFAULT_NAT_PORT);
        assert_eq!(config.login.port, DEFAULT_LOGIN_PORT);
        assert!(matches!(file.port("masterPort"), Err(ConfigError::InvalidPort { .. })));
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        assert_eq!(ConfigFile::parse("").backend_config(), BackendConfig::default());
    }

    #[test]
    fn test_load_or_create_writes_defaults_when_missing() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join(DEFAULT_CONFIG_FILE);

        // Act
        let file = ConfigFile::load_or_create(&path).expect("create");

        // Assert
        let written = fs::read_to_string(&path).expect("file written");
        assert!(written.starts_with("# GameSpy Replacement Configuration\n# Generated automatically\n"));
        assert!(written.contains("loginServer = gpcm.gamespy.com\n"));
        assert!(written.contains("natNegPort = 27901\n"));
        assert_eq!(file.backend_config(), BackendConfig::default());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_survive_a_rewrite() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "backend = Revora\nfavouriteMap = Tournament Desert\n").expect("seed");
        let mut file = ConfigFile::load_or_create(&path).expect("load");

        // Act
        let mut config = file.backend_config();
        config.master = Endpoint::new("127.0.0.1", 28910);
        file.set_backend_config(&config);
        file.save(&path).expect("save");

        // Assert
        let reloaded = ConfigFile::load(&path).expect("reload");
        assert_eq!(reloaded.get("favouriteMap"), Some("Tournament Desert"));
        assert_eq!(reloaded.backend_config().master, Endpoint::new("127.0.0.1", 28910));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file_is_io_error_with_path() {
        let path = temp_dir().join("absent.ini");
        match ConfigFile::load(&path) {
            Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
