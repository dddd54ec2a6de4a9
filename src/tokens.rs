//! Device token registry
//!
//! A user's push addresses live in two places: rows of the token table and
//! keys of the `fcm_tokens` map on the user row. Both are read, merged into
//! one set, and each token remembers where it came from so a dead token is
//! deleted from exactly the sources that hold it.

use async_trait::async_trait;
use futures_util::future::join_all;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// Read and delete access to both token sources
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn collection_tokens(&self, user_id: &str) -> Result<Vec<String>>;
    async fn map_tokens(&self, user_id: &str) -> Result<Vec<String>>;
    async fn delete_collection_token(&self, user_id: &str, token: &str) -> Result<()>;
    async fn delete_map_token(&self, user_id: &str, token: &str) -> Result<()>;
}

/// Which source(s) a token was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    Collection,
    Map,
    Both,
}

impl TokenOrigin {
    fn merge(self, other: TokenOrigin) -> TokenOrigin {
        if self == other {
            self
        } else {
            TokenOrigin::Both
        }
    }

    pub fn in_collection(self) -> bool {
        matches!(self, TokenOrigin::Collection | TokenOrigin::Both)
    }

    pub fn in_map(self) -> bool {
        matches!(self, TokenOrigin::Map | TokenOrigin::Both)
    }
}

/// The union of a user's tokens with their provenance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTokens {
    origins: BTreeMap<String, TokenOrigin>,
}

impl UserTokens {
    pub fn from_sources<C, M>(collection: C, map: M) -> Self
    where
        C: IntoIterator<Item = String>,
        M: IntoIterator<Item = String>,
    {
        let mut tokens = Self::default();
        for token in collection {
            tokens.insert(token, TokenOrigin::Collection);
        }
        for token in map {
            tokens.insert(token, TokenOrigin::Map);
        }
        tokens
    }

    fn insert(&mut self, token: String, origin: TokenOrigin) {
        if token.is_empty() {
            return;
        }
        self.origins
            .entry(token)
            .and_modify(|existing| *existing = existing.merge(origin))
            .or_insert(origin);
    }

    /// Every distinct token, in a stable order
    pub fn tokens(&self) -> Vec<String> {
        self.origins.keys().cloned().collect()
    }

    pub fn origin(&self, token: &str) -> Option<TokenOrigin> {
        self.origins.get(token).copied()
    }

    pub fn collection_tokens(&self) -> Vec<&str> {
        self.filtered(TokenOrigin::in_collection)
    }

    pub fn map_tokens(&self) -> Vec<&str> {
        self.filtered(TokenOrigin::in_map)
    }

    fn filtered(&self, keep: fn(TokenOrigin) -> bool) -> Vec<&str> {
        self.origins
            .iter()
            .filter(|(_, origin)| keep(**origin))
            .map(|(token, _)| token.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// What a prune attempt managed to remove. Failures are recorded here and
/// never surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    pub token: String,
    pub removed: usize,
    pub failures: Vec<String>,
}

impl PruneOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn TokenStore>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Reads both sources concurrently and merges them
    pub async fn collect(&self, user_id: &str) -> Result<UserTokens> {
        let (collection, map) = tokio::try_join!(
            self.store.collection_tokens(user_id),
            self.store.map_tokens(user_id)
        )?;
        Ok(UserTokens::from_sources(collection, map))
    }

    /// Best-effort removal of `token` from every source in `origin`
    pub async fn prune(&self, user_id: &str, token: &str, origin: TokenOrigin) -> PruneOutcome {
        let from_collection = async {
            if origin.in_collection() {
                Some(self.store.delete_collection_token(user_id, token).await)
            } else {
                None
            }
        };
        let from_map = async {
            if origin.in_map() {
                Some(self.store.delete_map_token(user_id, token).await)
            } else {
                None
            }
        };
        let (collection, map) = tokio::join!(from_collection, from_map);

        let mut outcome = PruneOutcome {
            token: token.to_string(),
            removed: 0,
            failures: Vec::new(),
        };
        for result in [collection, map].into_iter().flatten() {
            match result {
                Ok(()) => outcome.removed += 1,
                Err(e) => {
                    debug!("Pruning a token of user {} failed: {}", user_id, e);
                    outcome.failures.push(e.to_string());
                }
            }
        }
        outcome
    }

    /// Prunes several tokens at once
    pub async fn prune_all(&self, user_id: &str, dead: &[(String, TokenOrigin)]) -> Vec<PruneOutcome> {
        join_all(
            dead.iter()
                .map(|(token, origin)| self.prune(user_id, token, *origin)),
        )
        .await
    }
}
