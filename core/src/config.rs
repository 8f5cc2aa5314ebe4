//! Optional JSON settings file for the server subcommand: a serde struct
//! with per-field `#[serde(default = ...)]` functions, loaded and saved as
//! one JSON document.
//!
//! CLI flags always win: the `server` subcommand loads this as the base
//! and overlays any flag the user actually passed a non-default value for.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_listen() -> String {
    "0.0.0.0:2233".to_string()
}

fn default_cert() -> String {
    "cert.pem".to_string()
}

fn default_key() -> String {
    "key.pem".to_string()
}

fn default_auth() -> String {
    "Mikubill-wSocks".to_string()
}

fn default_hash() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_cert")]
    pub cert: String,

    #[serde(default = "default_key")]
    pub key: String,

    /// Upstream to proxy non-upgrade HTTP requests to, if any.
    #[serde(default)]
    pub reverse: Option<String>,

    #[serde(default = "default_auth")]
    pub auth: String,

    #[serde(default = "default_hash")]
    pub hash: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub stats: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cert: default_cert(),
            key: default_key(),
            reverse: None,
            auth: default_auth(),
            hash: default_hash(),
            debug: false,
            stats: false,
        }
    }
}

impl ServerSettings {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let settings = ServerSettings::default();
        let text = serde_json::to_string(&settings).unwrap();
        let parsed: ServerSettings = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.listen, settings.listen);
        assert_eq!(parsed.hash, settings.hash);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed: ServerSettings = serde_json::from_str("{\"listen\": \"0.0.0.0:9000\"}").unwrap();
        assert_eq!(parsed.listen, "0.0.0.0:9000");
        assert_eq!(parsed.auth, "Mikubill-wSocks");
        assert!(!parsed.debug);
    }
}
