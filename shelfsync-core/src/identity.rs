//! Book identity resolution and the shared metadata cache
//!
//! A book's identity is the SHA-256 of its full content, so byte-identical
//! files imported on different devices collapse to the same record. Metadata
//! is resolved lazily through a [`MetadataSource`] and cached per hash for the
//! lifetime of the process. Concurrent lookups for the same hash share a single
//! in-flight resolution.

use crate::document::MetadataSource;
use crate::error::{IdentityError, MetadataError};
use crate::storage::{book_content_path, StorageProvider};
use crate::types::{BookHash, Metadata};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Compute the identity of book content read from `reader`
pub fn resolve_identity(reader: &mut dyn Read) -> Result<BookHash, IdentityError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0usize;

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| IdentityError::Unreadable(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n;
    }

    if total == 0 {
        return Err(IdentityError::Empty);
    }

    Ok(BookHash::from_digest(&hasher.finalize()))
}

/// Compute the identity of in-memory book content
pub fn hash_content(content: &[u8]) -> Result<BookHash, IdentityError> {
    resolve_identity(&mut &content[..])
}

/// Check that `content` really is the book identified by `expected`
pub fn verify_identity(expected: &BookHash, content: &[u8]) -> Result<(), IdentityError> {
    let actual = hash_content(content)?;
    if &actual == expected {
        Ok(())
    } else {
        Err(IdentityError::Mismatch {
            expected: expected.clone(),
            actual,
        })
    }
}

type CacheSlot = Arc<OnceCell<Arc<Metadata>>>;

/// Resolves metadata for books held in local storage
pub struct IdentityResolver {
    local: Arc<dyn StorageProvider>,
    source: Arc<dyn MetadataSource>,
    timeout: Duration,
    cache: Mutex<HashMap<BookHash, CacheSlot>>,
}

impl IdentityResolver {
    pub fn new(
        local: Arc<dyn StorageProvider>,
        source: Arc<dyn MetadataSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            local,
            source,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Metadata for `hash`, resolving it on a cache miss.
    ///
    /// Fails with `Unavailable` if the local document cannot be opened and
    /// with `Timeout` if resolution exceeds the configured deadline. Failures
    /// are not cached; the next call retries.
    pub async fn fetch_metadata(&self, hash: &BookHash) -> Result<Arc<Metadata>, MetadataError> {
        let slot = self.cache.lock().entry(hash.clone()).or_default().clone();

        if let Some(metadata) = slot.get() {
            return Ok(metadata.clone());
        }

        let resolution = slot.get_or_try_init(|| self.resolve(hash));
        match tokio::time::timeout(self.timeout, resolution).await {
            Ok(result) => result.cloned(),
            Err(_) => {
                tracing::warn!(hash = %hash, timeout_ms = self.timeout.as_millis() as u64, "Metadata resolution timed out");
                Err(MetadataError::Timeout {
                    hash: hash.clone(),
                    after: self.timeout,
                })
            }
        }
    }

    async fn resolve(&self, hash: &BookHash) -> Result<Arc<Metadata>, MetadataError> {
        let unavailable = |reason: String| MetadataError::Unavailable {
            hash: hash.clone(),
            reason,
        };

        tracing::debug!(hash = %hash, "Resolving book metadata");

        let content = self
            .local
            .read(&book_content_path(hash))
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let source = Arc::clone(&self.source);
        let metadata = tokio::task::spawn_blocking(move || source.open_metadata(&content))
            .await
            .map_err(|e| unavailable(format!("metadata task failed: {}", e)))?
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Arc::new(metadata))
    }

    /// Cached metadata, without resolving
    pub fn cached(&self, hash: &BookHash) -> Option<Arc<Metadata>> {
        self.cache.lock().get(hash).and_then(|slot| slot.get().cloned())
    }

    /// Drop the cached entry for `hash`.
    ///
    /// Content changing under an existing hash is a data-integrity anomaly,
    /// so this is logged rather than treated as routine.
    pub fn invalidate(&self, hash: &BookHash) -> bool {
        let removed = self.cache.lock().remove(hash);
        let had_value = removed.map(|slot| slot.initialized()).unwrap_or(false);
        if had_value {
            tracing::warn!(hash = %hash, "Invalidated cached metadata; content changed under an existing identity");
        }
        had_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentError;
    use crate::storage::MemoryStorage;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl MetadataSource for CountingSource {
        fn open_metadata(&self, content: &[u8]) -> Result<Metadata, DocumentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if content.starts_with(b"bad") {
                return Err(DocumentError::UnsupportedFormat);
            }
            Ok(Metadata::new(String::from_utf8_lossy(content).to_string()))
        }
    }

    async fn resolver_with(
        content: &[u8],
        source: Arc<CountingSource>,
        timeout: Duration,
    ) -> (IdentityResolver, BookHash) {
        let storage = Arc::new(MemoryStorage::new());
        let hash = hash_content(content).unwrap();
        storage
            .write(&book_content_path(&hash), content.to_vec())
            .await
            .unwrap();
        (IdentityResolver::new(storage, source, timeout), hash)
    }

    #[test]
    fn test_empty_content_rejected() {
        assert_eq!(hash_content(b""), Err(IdentityError::Empty));
    }

    #[test]
    fn test_unreadable_content_rejected() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            }
        }

        assert!(matches!(
            resolve_identity(&mut Broken),
            Err(IdentityError::Unreadable(_))
        ));
    }

    #[test]
    fn test_known_digest() {
        let hash = hash_content(b"abc").unwrap();
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_identity_mismatch() {
        let hash = hash_content(b"original").unwrap();
        assert!(verify_identity(&hash, b"original").is_ok());
        assert!(matches!(
            verify_identity(&hash, b"tampered"),
            Err(IdentityError::Mismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn identity_is_deterministic(content in proptest::collection::vec(any::<u8>(), 1..4096)) {
            let first = hash_content(&content).unwrap();
            let second = resolve_identity(&mut std::io::Cursor::new(content.clone())).unwrap();
            prop_assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_metadata_cached_after_first_fetch() {
        let source = CountingSource::new(Duration::ZERO);
        let (resolver, hash) =
            resolver_with(b"Middlemarch", source.clone(), Duration::from_secs(5)).await;

        assert!(resolver.cached(&hash).is_none());
        let first = resolver.fetch_metadata(&hash).await.unwrap();
        let second = resolver.fetch_metadata(&hash).await.unwrap();

        assert_eq!(first.title, "Middlemarch");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.cached(&hash).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_coalesce() {
        let source = CountingSource::new(Duration::from_millis(50));
        let (resolver, hash) =
            resolver_with(b"Persuasion", source.clone(), Duration::from_secs(5)).await;
        let resolver = Arc::new(resolver);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            let hash = hash.clone();
            handles.push(tokio::spawn(
                async move { resolver.fetch_metadata(&hash).await },
            ));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().title, "Persuasion");
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_content_is_unavailable() {
        let source = CountingSource::new(Duration::ZERO);
        let resolver = IdentityResolver::new(
            Arc::new(MemoryStorage::new()),
            source,
            Duration::from_secs(1),
        );
        let hash = hash_content(b"never stored").unwrap();

        assert!(matches!(
            resolver.fetch_metadata(&hash).await,
            Err(MetadataError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let source = CountingSource::new(Duration::ZERO);
        let (resolver, hash) =
            resolver_with(b"bad document", source.clone(), Duration::from_secs(1)).await;

        assert!(resolver.fetch_metadata(&hash).await.is_err());
        assert!(resolver.fetch_metadata(&hash).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_resolution_times_out() {
        let source = CountingSource::new(Duration::from_millis(500));
        let (resolver, hash) =
            resolver_with(b"Ulysses", source, Duration::from_millis(20)).await;

        let err = resolver.fetch_metadata(&hash).await.unwrap_err();
        assert!(matches!(err, MetadataError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = CountingSource::new(Duration::ZERO);
        let (resolver, hash) =
            resolver_with(b"Emma", source.clone(), Duration::from_secs(1)).await;

        resolver.fetch_metadata(&hash).await.unwrap();
        assert!(resolver.invalidate(&hash));
        assert!(!resolver.invalidate(&hash));

        resolver.fetch_metadata(&hash).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
