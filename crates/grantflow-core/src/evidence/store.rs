//! Content-addressed object storage for evidence photos.
//!
//! Stored objects are keyed by the SHA-256 of their bytes, which gives the
//! three properties evidence needs for free: integrity (the reference
//! proves the content), deduplication (re-uploading the same photo is a
//! no-op), and immutability (there is no in-place mutation — a different
//! photo is a different reference).
//!
//! [`MemoryObjectStore`] is the in-process backend used by tests and
//! single-node deployments; the trait leaves room for a blob-service
//! backend without touching the capture pipeline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum evidence photo size (25 MB).
pub const MAX_PHOTO_SIZE: usize = 25 * 1024 * 1024;

/// Default maximum total size for the in-memory store (1 GB).
pub const DEFAULT_MAX_TOTAL_SIZE: usize = 1024 * 1024 * 1024;

/// Durable reference to a stored object: the hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef(pub String);

impl ObjectRef {
    /// Computes the reference for a byte slice.
    #[must_use]
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }
}

/// Errors that can occur in object storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No object exists for the reference.
    #[error("object not found: {object_ref}")]
    NotFound {
        /// The missing reference (hex).
        object_ref: String,
    },

    /// Stored bytes no longer match their reference (corruption).
    #[error("content mismatch for {object_ref}: stored bytes hash to {actual}")]
    ContentMismatch {
        /// The expected reference (hex).
        object_ref: String,
        /// The hash the stored bytes actually produce (hex).
        actual: String,
    },

    /// Empty objects are not allowed.
    #[error("empty content is not allowed")]
    EmptyContent,

    /// Object exceeds the per-object size limit.
    #[error("content too large: {size} bytes exceeds maximum of {max_size} bytes")]
    ContentTooLarge {
        /// The actual size.
        size: usize,
        /// The maximum allowed size.
        max_size: usize,
    },

    /// Total storage capacity exceeded.
    #[error("storage full: {current_size} + {new_size} exceeds limit of {max_size} bytes")]
    StorageFull {
        /// Current total size.
        current_size: usize,
        /// Size of the new object.
        new_size: usize,
        /// Maximum total size.
        max_size: usize,
    },

    /// Transient backend failure; the caller may retry.
    #[error("transient storage error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },
}

/// Trait for evidence object storage backends.
///
/// Implementations must ensure:
/// 1. `put` is idempotent for identical bytes (deduplication)
/// 2. stored objects are immutable
/// 3. `get` verifies content against the reference before returning
pub trait ObjectStore: Send + Sync {
    /// Stores bytes and returns their durable reference.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EmptyContent`] for empty input
    /// - [`StoreError::ContentTooLarge`] past the per-object limit
    /// - [`StoreError::StorageFull`] past the total capacity
    /// - [`StoreError::Transient`] for retryable backend failures
    fn put(&self, bytes: &[u8]) -> Result<ObjectRef, StoreError>;

    /// Retrieves bytes by reference, verifying content integrity.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no object has this reference
    /// - [`StoreError::ContentMismatch`] on corruption
    fn get(&self, object_ref: &ObjectRef) -> Result<Vec<u8>, StoreError>;

    /// Checks whether an object exists without retrieving it.
    fn exists(&self, object_ref: &ObjectRef) -> bool;
}

/// In-memory content-addressed object store.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<ObjectRef, Vec<u8>>>>,
    max_total_size: usize,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    /// Creates a store with the default total-size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_TOTAL_SIZE)
    }

    /// Creates a store with a custom total-size limit.
    #[must_use]
    pub fn with_max_size(max_total_size: usize) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            max_total_size,
        }
    }

    /// Returns the number of stored objects.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns true if the store is empty.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a thread panic).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, bytes: &[u8]) -> Result<ObjectRef, StoreError> {
        if bytes.is_empty() {
            return Err(StoreError::EmptyContent);
        }
        if bytes.len() > MAX_PHOTO_SIZE {
            return Err(StoreError::ContentTooLarge {
                size: bytes.len(),
                max_size: MAX_PHOTO_SIZE,
            });
        }

        let object_ref = ObjectRef::for_bytes(bytes);
        let mut objects = self.objects.write().expect("lock poisoned");

        // Deduplication: identical content is already durable.
        if objects.contains_key(&object_ref) {
            return Ok(object_ref);
        }

        let current_size: usize = objects.values().map(Vec::len).sum();
        if current_size + bytes.len() > self.max_total_size {
            return Err(StoreError::StorageFull {
                current_size,
                new_size: bytes.len(),
                max_size: self.max_total_size,
            });
        }

        objects.insert(object_ref.clone(), bytes.to_vec());
        Ok(object_ref)
    }

    fn get(&self, object_ref: &ObjectRef) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().expect("lock poisoned");
        let bytes = objects.get(object_ref).ok_or_else(|| StoreError::NotFound {
            object_ref: object_ref.0.clone(),
        })?;

        let actual = ObjectRef::for_bytes(bytes);
        if actual != *object_ref {
            return Err(StoreError::ContentMismatch {
                object_ref: object_ref.0.clone(),
                actual: actual.0,
            });
        }
        Ok(bytes.clone())
    }

    fn exists(&self, object_ref: &ObjectRef) -> bool {
        self.objects
            .read()
            .expect("lock poisoned")
            .contains_key(object_ref)
    }
}

/// Object store wrapper that fails the first `failures` puts with a
/// transient error. Test-only helper for exercising the retry path.
#[cfg(test)]
pub(super) struct FlakyObjectStore {
    inner: MemoryObjectStore,
    failures: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl FlakyObjectStore {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            failures: std::sync::atomic::AtomicU32::new(failures),
        }
    }
}

#[cfg(test)]
impl ObjectStore for FlakyObjectStore {
    fn put(&self, bytes: &[u8]) -> Result<ObjectRef, StoreError> {
        use std::sync::atomic::Ordering;
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Transient {
                message: "injected failure".to_string(),
            });
        }
        self.inner.put(bytes)
    }

    fn get(&self, object_ref: &ObjectRef) -> Result<Vec<u8>, StoreError> {
        self.inner.get(object_ref)
    }

    fn exists(&self, object_ref: &ObjectRef) -> bool {
        self.inner.exists(object_ref)
    }
}
