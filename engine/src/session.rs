//! The caller of an operation.

use crate::entity::DEFAULT_AUTH_KEY;
use crate::{EntityId, Error, Result};
use serde::{Deserialize, Serialize};

/// Who runs an operation and which auth keys they hold.
///
/// Supplied by the transport layer; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub subject_id: EntityId,
    pub auth_keys: Vec<String>,
}

impl Session {
    /// A session holding only the default auth key.
    pub fn new(subject_id: EntityId) -> Self {
        Self {
            subject_id,
            auth_keys: vec![DEFAULT_AUTH_KEY.to_string()],
        }
    }

    pub fn with_auth_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_auth_key(&self, key: &str) -> bool {
        self.auth_keys.iter().any(|k| k == key)
    }

    /// Auth key given to new entities that don't name one.
    pub fn default_auth_key(&self) -> &str {
        self.auth_keys
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_AUTH_KEY)
    }

    pub fn check_auth_key(&self, key: &str) -> Result<()> {
        if self.has_auth_key(key) {
            Ok(())
        } else {
            Err(Error::not_authorized("Wrong authKey provided"))
        }
    }

    /// Auth keys a query may read: the requested ones if the session holds
    /// all of them, else all of the session's keys when none are requested.
    pub fn resolve_auth_keys(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.auth_keys.clone());
        }
        for key in requested {
            self.check_auth_key(key)?;
        }
        Ok(requested.to_vec())
    }
}
