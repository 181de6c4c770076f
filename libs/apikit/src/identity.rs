//! Caller identity and the provider that resolves it from a bearer credential.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

/// Named permission granted to an identity and required by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Sentinel that lets unauthenticated callers through.
    pub const PUBLIC: Role = Role::from_static("PUBLIC");

    pub const fn from_static(name: &'static str) -> Self {
        Role(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Role(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_public(&self) -> bool {
        *self == Role::PUBLIC
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(name: &'static str) -> Self {
        Role::from_static(name)
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub roles: BTreeSet<Role>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role<'a>(&self, roles: impl IntoIterator<Item = &'a Role>) -> bool {
        roles.into_iter().any(|r| self.roles.contains(r))
    }
}

/// Resolves the identity behind a caller token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` means the token is unknown or expired.
    async fn resolve(&self, token: &str) -> Option<Identity>;
}

/// One entry of a static token table, as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub subject: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Fixed token table for development setups and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a TokenGrant>) -> Self {
        let tokens = grants
            .into_iter()
            .map(|g| {
                let identity = Identity::new(g.subject.clone(), g.roles.iter().cloned().map(Role::new));
                (g.token.clone(), identity)
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn static_provider_resolves_grants() {
        let grants = vec![TokenGrant {
            token: "t-admin".into(),
            subject: "alice".into(),
            roles: vec!["ADMIN".into()],
        }];
        let provider = StaticIdentityProvider::from_grants(&grants);

        let identity = provider.resolve("t-admin").await.expect("known token");
        assert_eq!(identity.subject, "alice");
        assert!(identity.has_role(&Role::new("ADMIN")));
        assert!(provider.resolve("nope").await.is_none());
    }

    #[test]
    fn public_role_is_sentinel() {
        assert!(Role::PUBLIC.is_public());
        assert!(Role::new("PUBLIC").is_public());
        assert!(!Role::from_static("CUSTOMER").is_public());
    }
}
