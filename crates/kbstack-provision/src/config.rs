// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning configuration and its env file.
//!
//! The env file is the service's runtime configuration:
//!
//! ```text
//! VECTOR_DB_URL=https://cluster.example.cloud:6333
//! VECTOR_DB_API_KEY='s3cr3t'
//! DEBUG=false
//! LOG_LEVEL=info
//! ```
//!
//! It is written once per deployment and read-only afterwards.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use url::Url;

use crate::error::{ProvisionError, Result};

pub const VECTOR_DB_URL: &str = "VECTOR_DB_URL";
pub const VECTOR_DB_API_KEY: &str = "VECTOR_DB_API_KEY";
pub const DEBUG: &str = "DEBUG";
pub const LOG_LEVEL: &str = "LOG_LEVEL";
pub const TIMEOUT_SECONDS: &str = "TIMEOUT_SECONDS";

/// Default readiness timeout.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Vector database API key. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// The raw key, for injection into the service environment only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters for keys long enough to stay secret, else nothing.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() >= 12 {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("****{}", tail)
        } else {
            "****".to_string()
        }
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({})", self.masked())
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Validated credentials and runtime settings for the service.
///
/// Fields are private: a config is only built through validation and is
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningConfig {
    vector_db_url: Url,
    vector_db_api_key: ApiKey,
    timeout_seconds: u64,
    debug: Option<bool>,
    log_level: Option<String>,
}

impl ProvisioningConfig {
    /// Validate the two required credentials.
    pub fn new(vector_db_url: &str, vector_db_api_key: &str) -> Result<Self> {
        let url = vector_db_url.trim();
        if url.is_empty() {
            return Err(ProvisionError::MissingCredential(VECTOR_DB_URL));
        }
        let key = vector_db_api_key.trim();
        if key.is_empty() {
            return Err(ProvisionError::MissingCredential(VECTOR_DB_API_KEY));
        }

        let vector_db_url = Url::parse(url).map_err(|e| {
            ProvisionError::InvalidConfig(format!("{} is not a valid URL: {}", VECTOR_DB_URL, e))
        })?;
        if !matches!(vector_db_url.scheme(), "http" | "https") || !vector_db_url.has_host() {
            return Err(ProvisionError::InvalidConfig(format!(
                "{} must be an http(s) URL with a host",
                VECTOR_DB_URL
            )));
        }
        reject_control_chars(VECTOR_DB_API_KEY, key)?;

        Ok(Self {
            vector_db_url,
            vector_db_api_key: ApiKey(key.to_string()),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            debug: None,
            log_level: None,
        })
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Result<Self> {
        if seconds == 0 {
            return Err(ProvisionError::InvalidConfig(format!(
                "{} must be at least 1",
                TIMEOUT_SECONDS
            )));
        }
        self.timeout_seconds = seconds;
        Ok(self)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Result<Self> {
        let level = level.into();
        reject_control_chars(LOG_LEVEL, &level)?;
        self.log_level = Some(level.trim().to_string()).filter(|l| !l.is_empty());
        Ok(self)
    }

    /// Build from `KEY=value` pairs (the parsed env file). Unknown keys are
    /// ignored so operators can keep extra service settings in the file.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values: HashMap<String, String> = pairs.into_iter().collect();
        let get = |key: &str| values.get(key).map(String::as_str).unwrap_or("");

        let mut config = Self::new(get(VECTOR_DB_URL), get(VECTOR_DB_API_KEY))?;
        if let Some(raw) = values.get(TIMEOUT_SECONDS) {
            let seconds = raw.trim().parse().map_err(|e| {
                ProvisionError::InvalidConfig(format!("{} is not a number: {}", TIMEOUT_SECONDS, e))
            })?;
            config = config.with_timeout_seconds(seconds)?;
        }
        if let Some(raw) = values.get(DEBUG) {
            config = config.with_debug(parse_bool(raw));
        }
        if let Some(level) = values.get(LOG_LEVEL) {
            config = config.with_log_level(level.as_str())?;
        }
        Ok(config)
    }

    /// Load and validate an existing env file.
    pub fn load(path: &Path) -> Result<Self> {
        let iter = dotenvy::from_path_iter(path).map_err(|e| env_file_error(path, e))?;
        let pairs = iter
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| env_file_error(path, e))?;
        Self::from_pairs(pairs)
    }

    /// Write a new env file with owner-only permissions.
    ///
    /// Fails if the file already exists; the env file is never overwritten.
    pub fn write_new(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(self.render().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Env file contents. Keys are written in a fixed order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.entries() {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value(&value));
            out.push('\n');
        }
        out
    }

    /// Variables injected into the service's runtime environment.
    pub fn service_env(&self) -> Vec<(String, String)> {
        self.entries()
            .into_iter()
            .filter(|(key, _)| *key != TIMEOUT_SECONDS)
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![
            (VECTOR_DB_URL, self.vector_db_url_str().to_string()),
            (VECTOR_DB_API_KEY, self.vector_db_api_key.expose().to_string()),
        ];
        if let Some(debug) = self.debug {
            entries.push((DEBUG, debug.to_string()));
        }
        if let Some(level) = &self.log_level {
            entries.push((LOG_LEVEL, level.clone()));
        }
        if self.timeout_seconds != DEFAULT_TIMEOUT_SECONDS {
            entries.push((TIMEOUT_SECONDS, self.timeout_seconds.to_string()));
        }
        entries
    }

    pub fn vector_db_url(&self) -> &Url {
        &self.vector_db_url
    }

    /// URL as the operator typed it (the `url` crate appends `/` to bare hosts).
    fn vector_db_url_str(&self) -> &str {
        let s = self.vector_db_url.as_str();
        if self.vector_db_url.path() == "/"
            && self.vector_db_url.query().is_none()
            && self.vector_db_url.fragment().is_none()
        {
            s.strip_suffix('/').unwrap_or(s)
        } else {
            s
        }
    }

    pub fn vector_db_api_key(&self) -> &ApiKey {
        &self.vector_db_api_key
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }
}

fn env_file_error(path: &Path, err: dotenvy::Error) -> ProvisionError {
    match err {
        dotenvy::Error::Io(e) => ProvisionError::Io(e),
        other => ProvisionError::InvalidConfig(format!("{}: {}", path.display(), other)),
    }
}

fn reject_control_chars(key: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control()) {
        return Err(ProvisionError::InvalidConfig(format!(
            "{} must not contain control characters",
            key
        )));
    }
    Ok(())
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Quote a value so the dotenv parser reads it back verbatim.
///
/// Single quotes are literal (no escapes, no `$` substitution), so they are
/// used whenever possible; values containing `'` fall back to double quotes
/// with escaping.
fn quote_value(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.:/@+,%?&=~".contains(c));
    if plain && !value.is_empty() {
        return value.to_string();
    }
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_empty_credentials() {
        let err = ProvisioningConfig::new("", "key").unwrap_err();
        assert!(matches!(err, ProvisionError::MissingCredential(VECTOR_DB_URL)));

        let err = ProvisioningConfig::new("https://db.example.com", "   ").unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::MissingCredential(VECTOR_DB_API_KEY)
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_rejects_non_url() {
        let err = ProvisioningConfig::new("not a url", "key").unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));

        let err = ProvisioningConfig::new("file:///tmp/db", "key").unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
    }

    #[test]
    fn test_api_key_is_masked() {
        let config =
            ProvisioningConfig::new("https://db.example.com", "qdrant-secret-1234").unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("qdrant-secret"));
        assert!(debug.contains("****1234"));
        assert_eq!(config.vector_db_api_key().to_string(), "****1234");

        let short = ProvisioningConfig::new("https://db.example.com", "abc").unwrap();
        assert_eq!(short.vector_db_api_key().masked(), "****");
    }

    #[test]
    fn test_render_keeps_url_as_typed() {
        let config = ProvisioningConfig::new("https://db.example.com:6333", "key")
            .unwrap()
            .with_debug(false)
            .with_log_level("info")
            .unwrap();
        assert_eq!(
            config.render(),
            "VECTOR_DB_URL=https://db.example.com:6333\nVECTOR_DB_API_KEY=key\nDEBUG=false\nLOG_LEVEL=info\n"
        );
    }

    #[test]
    fn test_quoting_round_trips_through_dotenv() {
        let dir = TempDir::new().unwrap();
        let awkward = [
            "plain-Key_1.2",
            "has space",
            "dollar$HOME",
            "hash # comment",
            "single'quote",
            r#"both'and"double$x\y"#,
        ];

        for (i, key) in awkward.iter().enumerate() {
            let path = dir.path().join(format!("env-{}", i));
            let config = ProvisioningConfig::new("http://localhost:6333", key).unwrap();
            config.write_new(&path).unwrap();

            let loaded = ProvisioningConfig::load(&path).unwrap();
            assert_eq!(loaded.vector_db_api_key().expose(), *key);
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_write_new_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        let config = ProvisioningConfig::new("https://db.example.com", "key").unwrap();
        config.write_new(&path).unwrap();

        let err = config.write_new(&path).unwrap_err();
        assert!(matches!(err, ProvisionError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_new_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        ProvisioningConfig::new("https://db.example.com", "key")
            .unwrap()
            .write_new(&path)
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_from_pairs_optional_values() {
        let pairs = vec![
            (VECTOR_DB_URL.to_string(), "https://db.example.com".to_string()),
            (VECTOR_DB_API_KEY.to_string(), "key".to_string()),
            (DEBUG.to_string(), "1".to_string()),
            (TIMEOUT_SECONDS.to_string(), "60".to_string()),
            ("EXTRA".to_string(), "ignored".to_string()),
        ];
        let config = ProvisioningConfig::from_pairs(pairs).unwrap();
        assert!(config.debug());
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.log_level().is_none());

        let env = config.service_env();
        assert!(env.contains(&("DEBUG".to_string(), "true".to_string())));
        assert!(!env.iter().any(|(k, _)| k == TIMEOUT_SECONDS));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let pairs = vec![
            (VECTOR_DB_URL.to_string(), "https://db.example.com".to_string()),
            (VECTOR_DB_API_KEY.to_string(), "key".to_string()),
            (TIMEOUT_SECONDS.to_string(), "0".to_string()),
        ];
        assert!(matches!(
            ProvisioningConfig::from_pairs(pairs),
            Err(ProvisionError::InvalidConfig(_))
        ));
    }
}
