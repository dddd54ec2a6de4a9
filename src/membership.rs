//! Household membership lookups with a per-run cache

use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;

/// Lists the users of a household
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn member_ids(&self, family_id: &str) -> Result<Vec<String>>;
}

/// Memoizes household members for the lifetime of one run.
///
/// Two tasks that miss on the same household at the same time may both
/// query the directory; the first answer stored wins. Failed lookups are not
/// cached.
pub struct MembershipCache {
    directory: Arc<dyn MemberDirectory>,
    members: RwLock<HashMap<String, Arc<Vec<String>>>>,
    lookups: AtomicUsize,
}

impl MembershipCache {
    pub fn new(directory: Arc<dyn MemberDirectory>) -> Self {
        Self {
            directory,
            members: RwLock::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Distinct member ids of `family_id`, in directory order
    pub async fn resolve(&self, family_id: &str) -> Result<Arc<Vec<String>>> {
        if let Some(members) = self.members.read().await.get(family_id) {
            return Ok(Arc::clone(members));
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        let mut seen = HashSet::new();
        let ids: Vec<String> = self
            .directory
            .member_ids(family_id)
            .await?
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        debug!("Household {} has {} member(s)", family_id, ids.len());

        let mut members = self.members.write().await;
        Ok(Arc::clone(
            members
                .entry(family_id.to_string())
                .or_insert_with(|| Arc::new(ids)),
        ))
    }

    /// Directory queries issued so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct CountingDirectory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MemberDirectory for CountingDirectory {
        async fn member_ids(&self, family_id: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match family_id {
                "fam-1" => Ok(vec!["u1".to_string(), "u2".to_string(), "u1".to_string()]),
                "broken" => Err(Error::backend("directory offline")),
                _ => Ok(Vec::new()),
            }
        }
    }

    #[tokio::test]
    async fn second_lookup_hits_cache() {
        let directory = Arc::new(CountingDirectory::default());
        let cache = MembershipCache::new(directory.clone());

        let first = cache.resolve("fam-1").await.unwrap();
        let second = cache.resolve("fam-1").await.unwrap();

        assert_eq!(*first, vec!["u1".to_string(), "u2".to_string()]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.lookups(), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let directory = Arc::new(CountingDirectory::default());
        let cache = MembershipCache::new(directory.clone());

        assert!(cache.resolve("broken").await.is_err());
        assert!(cache.resolve("broken").await.is_err());
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn caches_are_independent_per_run() {
        let directory = Arc::new(CountingDirectory::default());

        tokio_test::block_on(async {
            MembershipCache::new(directory.clone()).resolve("fam-1").await.unwrap();
            MembershipCache::new(directory.clone()).resolve("fam-1").await.unwrap();
        });

        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }
}
