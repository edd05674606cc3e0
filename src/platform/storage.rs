//! Key-value storage backends
//!
//! The browser build talks to `window.localStorage`; native builds and tests
//! use an in-memory map with the same failure modes (quota, unavailable).

use std::collections::HashMap;

use thiserror::Error;

/// Failures raised by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The medium cannot be reached (no window, storage disabled, private mode)
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The write would exceed the medium's quota
    #[error("storage quota exceeded writing '{key}'")]
    QuotaExceeded { key: String },
}

/// Minimal string key-value store, shaped after the Web Storage API
pub trait StorageBackend {
    /// Read a value; `Ok(None)` when the key is absent
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write (overwrite) a value
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key; removing an absent key is not an error
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;
}

/// In-memory backend with optional quota and fault injection
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: HashMap<String, String>,
    /// Quota in UTF-16 code units over all keys and values (browser accounting)
    quota: Option<usize>,
    unavailable: bool,
}

impl MemoryStorage {
    /// Create an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store limited to `quota` UTF-16 code units
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail with `StorageError::Unavailable`
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Unavailable("memory storage disabled".to_string()))
        } else {
            Ok(())
        }
    }

    fn units(s: &str) -> usize {
        s.encode_utf16().count()
    }

    fn used_units_excluding(&self, key: &str) -> usize {
        self.items
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| Self::units(k) + Self::units(v))
            .sum()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_available()?;
        if let Some(quota) = self.quota {
            let needed = self.used_units_excluding(key) + Self::units(key) + Self::units(value);
            if needed > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.check_available()?;
        self.items.remove(key);
        Ok(())
    }
}

/// `window.localStorage` backend (WASM only)
#[cfg(target_arch = "wasm32")]
pub struct LocalStorage {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl LocalStorage {
    /// Open the page's local storage
    pub fn open() -> Result<Self, StorageError> {
        let window = web_sys::window()
            .ok_or_else(|| StorageError::Unavailable("no window".to_string()))?;
        let storage = window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage disabled".to_string()))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl StorageBackend for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        // Browsers throw a DOMException named QuotaExceededError when full
        self.storage.set_item(key, value).map_err(|e| {
            let text = format!("{:?}", e);
            if text.contains("Quota") {
                StorageError::QuotaExceeded {
                    key: key.to_string(),
                }
            } else {
                StorageError::Unavailable(text)
            }
        })
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }
}
