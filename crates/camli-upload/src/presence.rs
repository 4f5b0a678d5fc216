//! Presence checking: ask the store which references it already has.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use camli_core::ContentReference;

use crate::error::NetworkError;
use crate::store::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// One entry per queried reference.
pub type PresenceMap = HashMap<ContentReference, Presence>;

pub struct PresenceChecker {
    store: Arc<dyn BlobStore>,
    max_batch: usize,
}

impl PresenceChecker {
    /// `max_batch` is clamped to at least one reference per request.
    pub fn new(store: Arc<dyn BlobStore>, max_batch: usize) -> Self {
        Self {
            store,
            max_batch: max_batch.max(1),
        }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Classify every reference in `references`.
    ///
    /// Sets larger than the batch size go out as sequential requests. Any
    /// failed request fails the whole check; no partial map is returned.
    /// An empty set makes no request at all.
    pub async fn check(
        &self,
        references: &BTreeSet<ContentReference>,
    ) -> Result<PresenceMap, NetworkError> {
        let mut map: PresenceMap = references
            .iter()
            .map(|r| (r.clone(), Presence::Absent))
            .collect();
        if references.is_empty() {
            return Ok(map);
        }

        let ordered: Vec<ContentReference> = references.iter().cloned().collect();
        let pages = ordered.len().div_ceil(self.max_batch);

        for (page, batch) in ordered.chunks(self.max_batch).enumerate() {
            let present = self.store.present(batch).await.map_err(|e| {
                tracing::warn!(page, pages, error = %e, "presence request failed");
                e
            })?;

            for reference in present {
                match map.get_mut(&reference) {
                    Some(slot) => *slot = Presence::Present,
                    None => {
                        tracing::debug!(reference = %reference, "store reported unrequested reference")
                    }
                }
            }
        }

        let present = map.values().filter(|p| **p == Presence::Present).count();
        tracing::debug!(
            queried = map.len(),
            present,
            pages,
            "presence check complete"
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use camli_core::Hasher;

    fn refs(n: usize) -> BTreeSet<ContentReference> {
        let hasher = Hasher::default();
        (0..n)
            .map(|i| hasher.reference(format!("blob {i}").as_bytes()))
            .collect()
    }

    #[tokio::test]
    async fn classifies_every_reference() {
        let store = Arc::new(MemoryBlobStore::new());
        let hasher = Hasher::default();
        let known = store.seed(&b"on server"[..], &hasher);
        let mut query = refs(3);
        query.insert(known.clone());

        let checker = PresenceChecker::new(store.clone(), 10);
        let map = checker.check(&query).await.unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(map[&known], Presence::Present);
        assert_eq!(
            map.values().filter(|p| **p == Presence::Absent).count(),
            3
        );
        assert_eq!(store.presence_calls(), 1);
    }

    #[tokio::test]
    async fn empty_query_makes_no_request() {
        let store = Arc::new(MemoryBlobStore::new());
        let checker = PresenceChecker::new(store.clone(), 10);
        let map = checker.check(&BTreeSet::new()).await.unwrap();
        assert!(map.is_empty());
        assert_eq!(store.presence_calls(), 0);
    }

    #[tokio::test]
    async fn large_sets_are_paged() {
        let store = Arc::new(MemoryBlobStore::new());
        let checker = PresenceChecker::new(store.clone(), 4);
        let map = checker.check(&refs(10)).await.unwrap();

        assert_eq!(map.len(), 10);
        assert_eq!(store.presence_calls(), 3);
        assert_eq!(store.presence_references(), 10);
    }

    #[tokio::test]
    async fn failure_fails_whole_check() {
        let store = Arc::new(MemoryBlobStore::new());
        store.set_presence_outage(true);
        let checker = PresenceChecker::new(store, 4);
        let err = checker.check(&refs(5)).await.unwrap_err();
        assert!(matches!(err, NetworkError::Unreachable(_)));
    }

    #[test]
    fn zero_batch_is_clamped() {
        let checker = PresenceChecker::new(Arc::new(MemoryBlobStore::new()), 0);
        assert_eq!(checker.max_batch(), 1);
    }
}
