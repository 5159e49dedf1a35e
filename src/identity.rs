//! Caller identity resolution.
//!
//! The engines only ever see a resolved [`Caller`].  How a credential maps
//! to a caller is behind the [`IdentityResolver`] trait; the server wires
//! in [`StaticIdentityResolver`], seeded from `auth.identities`.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use subtle::ConstantTimeEq;

use crate::config::IdentityConfig;

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub name: String,
}

impl Caller {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Maps a presented credential to a caller.
pub trait IdentityResolver: Send + Sync {
    /// Returns `None` when the credential is not recognised.
    fn resolve(
        &self,
        credential: &str,
    ) -> Pin<Box<dyn Future<Output = Option<Caller>> + Send + '_>>;
}

/// Fixed token table.
pub struct StaticIdentityResolver {
    /// (token, caller name)
    entries: Vec<(String, String)>,
}

impl StaticIdentityResolver {
    pub fn new(identities: &[IdentityConfig]) -> Self {
        Self {
            entries: identities
                .iter()
                .map(|i| (i.token.clone(), i.name.clone()))
                .collect(),
        }
    }
}

/// Compare two tokens in constant time.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve(
        &self,
        credential: &str,
    ) -> Pin<Box<dyn Future<Output = Option<Caller>> + Send + '_>> {
        // No early exit: every entry is compared.
        let mut found = None;
        for (token, name) in &self.entries {
            if constant_time_eq(token, credential) && found.is_none() {
                found = Some(Caller::new(name.clone()));
            }
        }
        Box::pin(async move { found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> StaticIdentityResolver {
        StaticIdentityResolver::new(&[
            IdentityConfig {
                name: "alice".into(),
                token: "token-alice".into(),
            },
            IdentityConfig {
                name: "bob".into(),
                token: "token-bob".into(),
            },
        ])
    }

    #[tokio::test]
    async fn test_known_token_resolves() {
        let caller = resolver().resolve("token-bob").await.unwrap();
        assert_eq!(caller, Caller::new("bob"));
    }

    #[tokio::test]
    async fn test_unknown_token_is_none() {
        let r = resolver();
        assert!(r.resolve("token-carol").await.is_none());
        assert!(r.resolve("").await.is_none());
        assert!(r.resolve("token-alic").await.is_none());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
