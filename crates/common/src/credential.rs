//! Secret credential wrapper.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An API credential.
///
/// `Debug` and `Display` never print the secret, so credentials can sit in
/// options structs that get logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self(s)
    }
}
