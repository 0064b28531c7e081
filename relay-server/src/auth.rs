//! # Authenticator (C13)
//!
//! Narrow collaborator contract the spec keeps deliberately abstract
//! ("API key validation ... is described as an external collaborator,
//! not specified in detail"). `StaticKeyAuthenticator` is the one
//! concrete implementation this relay ships: an allow-list of keys read
//! once from the environment at startup.

use std::collections::HashSet;

pub trait Authenticator: Send + Sync {
    fn is_valid(&self, api_key: &str) -> bool;
}

/// Accepts any key present in a fixed allow-list.
pub struct StaticKeyAuthenticator {
    keys: HashSet<String>,
}

impl StaticKeyAuthenticator {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    /// Parses the `RELAY_API_KEYS` convention: comma-separated keys.
    pub fn from_env_value(value: &str) -> Self {
        Self::new(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }
}

impl Authenticator for StaticKeyAuthenticator {
    fn is_valid(&self, api_key: &str) -> bool {
        self.keys.contains(api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_listed_key() {
        let auth = StaticKeyAuthenticator::from_env_value("a, b ,c");
        assert!(auth.is_valid("a"));
        assert!(auth.is_valid("b"));
        assert!(auth.is_valid("c"));
    }

    #[test]
    fn rejects_unlisted_key() {
        let auth = StaticKeyAuthenticator::from_env_value("a,b");
        assert!(!auth.is_valid("z"));
        assert!(!auth.is_valid(""));
    }
}
