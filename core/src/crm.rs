//! External collaborators consumed by the worker: the CRM wrapper and
//! the per-user credential lookup. The engine only sees these traits.

use crate::error::SimResult;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

pub type RecordProperties = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrmError {
    #[error("no access token for user")]
    MissingCredentials,

    #[error("CRM rejected the record: {0}")]
    Rejected(String),

    #[error("CRM unavailable: {0}")]
    Unavailable(String),
}

/// Creates one remote record per call and returns its remote id.
pub trait CrmClient: Send + Sync {
    fn create(
        &self,
        object_type: &str,
        properties: &RecordProperties,
        access_token: Option<&str>,
    ) -> Result<String, CrmError>;
}

/// Resolves a user id to a usable CRM access token.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> SimResult<Option<String>>;
}

/// Accepts every record without contacting a CRM.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunCrm;

impl CrmClient for DryRunCrm {
    fn create(
        &self,
        object_type: &str,
        properties: &RecordProperties,
        _access_token: Option<&str>,
    ) -> Result<String, CrmError> {
        let remote_id = uuid::Uuid::new_v4().to_string();
        log::debug!(
            "dry-run {object_type} {remote_id}: {}",
            Value::Object(properties.clone())
        );
        Ok(remote_id)
    }
}

/// Fixed user → token map.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    tokens: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, user_id: &str, token: &str) -> Self {
        self.tokens.insert(user_id.to_string(), token.to_string());
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, user_id: &str) -> SimResult<Option<String>> {
        Ok(self.tokens.get(user_id).cloned())
    }
}

/// One shared token read from an environment variable at lookup time.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub const DEFAULT_VAR: &'static str = "CRM_API_TOKEN";

    pub fn new(var: &str) -> Self {
        Self { var: var.to_string() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl CredentialResolver for EnvCredentials {
    fn resolve(&self, _user_id: &str) -> SimResult<Option<String>> {
        Ok(std::env::var(&self.var).ok().filter(|t| !t.is_empty()))
    }
}
