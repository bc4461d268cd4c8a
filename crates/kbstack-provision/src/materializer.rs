// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment materializer.
//!
//! Produces the `ProvisioningConfig` for a deployment. An existing env file
//! wins and is never rewritten; otherwise the credentials are solicited from
//! a `CredentialSource`, validated, and written once.

use std::collections::HashMap;
use std::path::Path;

use console::Term;
use tracing::{debug, info};

use crate::config::{DEBUG, LOG_LEVEL, ProvisioningConfig, VECTOR_DB_API_KEY, VECTOR_DB_URL};
use crate::error::{ProvisionError, Result};

/// What is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialRequest {
    /// Env file key
    pub key: &'static str,
    /// Input must not be echoed
    pub secret: bool,
    /// Provisioning cannot continue without it
    pub required: bool,
}

const REQUESTS: [CredentialRequest; 4] = [
    CredentialRequest {
        key: VECTOR_DB_URL,
        secret: false,
        required: true,
    },
    CredentialRequest {
        key: VECTOR_DB_API_KEY,
        secret: true,
        required: true,
    },
    CredentialRequest {
        key: DEBUG,
        secret: false,
        required: false,
    },
    CredentialRequest {
        key: LOG_LEVEL,
        secret: false,
        required: false,
    },
];

/// Somewhere credentials can come from.
pub trait CredentialSource {
    /// `Ok(None)` when this source has nothing to offer.
    fn solicit(&self, request: &CredentialRequest) -> Result<Option<String>>;
}

/// Values supplied up front, usually from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvSource {
    values: HashMap<String, String>,
}

impl EnvSource {
    /// Capture the credential variables from the process environment.
    pub fn from_process_env() -> Self {
        let values = REQUESTS
            .iter()
            .filter_map(|r| std::env::var(r.key).ok().map(|v| (r.key.to_string(), v)))
            .collect();
        Self { values }
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl CredentialSource for EnvSource {
    fn solicit(&self, request: &CredentialRequest) -> Result<Option<String>> {
        Ok(self.values.get(request.key).cloned())
    }
}

/// Interactive prompt on the operator's terminal.
///
/// Only required values are prompted for, and only when stderr is a
/// terminal. Secret input is not echoed.
#[derive(Debug, Clone)]
pub struct PromptSource {
    term: Term,
}

impl Default for PromptSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptSource {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
        }
    }
}

impl CredentialSource for PromptSource {
    fn solicit(&self, request: &CredentialRequest) -> Result<Option<String>> {
        if !request.required || !self.term.is_term() {
            return Ok(None);
        }
        self.term.write_str(&format!("{}: ", request.key))?;
        let line = if request.secret {
            self.term.read_secure_line()?
        } else {
            self.term.read_line()?
        };
        Ok(Some(line))
    }
}

/// Tries each source in order; the first non-empty value wins.
#[derive(Default)]
pub struct ChainSource {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl ChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl CredentialSource for ChainSource {
    fn solicit(&self, request: &CredentialRequest) -> Result<Option<String>> {
        for source in &self.sources {
            if let Some(value) = source.solicit(request)?
                && !value.trim().is_empty()
            {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// Result of materialization.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub config: ProvisioningConfig,
    /// The env file was written by this call
    pub created: bool,
}

/// Load the env file at `path`, or solicit, validate and write it.
///
/// Nothing is written unless every value validates.
pub fn materialize(path: &Path, source: &dyn CredentialSource) -> Result<Materialized> {
    if path.exists() {
        let config = ProvisioningConfig::load(path)?;
        info!(
            path = %path.display(),
            vector_db_url = %config.vector_db_url(),
            vector_db_api_key = %config.vector_db_api_key(),
            "Using existing env file"
        );
        return Ok(Materialized {
            config,
            created: false,
        });
    }

    debug!(path = %path.display(), "Env file missing, soliciting credentials");
    let mut values: HashMap<&'static str, String> = HashMap::new();
    for request in &REQUESTS {
        if let Some(value) = source.solicit(request)? {
            values.insert(request.key, value);
        }
    }

    let get = |key: &str| values.get(key).map(String::as_str).unwrap_or("");
    let mut config = ProvisioningConfig::new(get(VECTOR_DB_URL), get(VECTOR_DB_API_KEY))?;
    if let Some(debug) = values.get(DEBUG) {
        config = config.with_debug(crate::config::parse_bool(debug));
    }
    if let Some(level) = values.get(LOG_LEVEL) {
        config = config.with_log_level(level.as_str())?;
    }

    config.write_new(path).map_err(|e| match e {
        ProvisionError::Io(io) if io.kind() == std::io::ErrorKind::AlreadyExists => {
            ProvisionError::InvalidConfig(format!(
                "{} appeared while credentials were being collected",
                path.display()
            ))
        }
        other => other,
    })?;
    info!(
        path = %path.display(),
        vector_db_url = %config.vector_db_url(),
        vector_db_api_key = %config.vector_db_api_key(),
        "Env file written"
    );

    Ok(Materialized {
        config,
        created: true,
    })
}
