//! Read-through cache for computed listing and profile payloads.
//!
//! The cache is process-local. Invalidation on one instance is not seen by others, so in a
//! horizontally scaled deployment a peer may serve a listing up to one TTL old.
//!
//! Within one process, [`ReadThrough`] tags each computation with the invalidation generation
//! observed before it started. A payload computed before a write is dropped instead of being
//! stored after that write's invalidation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::DetectiveId;

pub const LISTING_PREFIX: &str = "detectives:list:";
pub const PROFILE_PREFIX: &str = "detectives:profile:";

/// Listing key from normalized query parameters; pairs are emitted in sorted order.
pub fn listing_key(params: &BTreeMap<&'static str, String>) -> String {
    let encoded: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("{LISTING_PREFIX}{}", encoded.join("&"))
}

pub fn profile_key(id: &DetectiveId) -> String {
    format!("{PROFILE_PREFIX}{id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    Prefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("cache payload could not be encoded: {0}")]
    Encode(String),
}

/// Key/value store with TTLs and prefix invalidation. Values are JSON documents.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), CacheError>;
    /// Returns how many entries were removed.
    fn invalidate(&self, target: &Invalidation) -> Result<usize, CacheError>;
}

struct Entry {
    value: Value,
    /// `None` when the TTL reaches past the last representable instant.
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// In-memory [`ResponseCache`] keyed by string.
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for TtlCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        if entries
            .get(key)
            .map(|entry| !entry.is_live(now))
            .unwrap_or(false)
        {
            entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), CacheError> {
        if ttl_seconds == 0 {
            return Ok(());
        }
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl));
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn invalidate(&self, target: &Invalidation) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        let removed = match target {
            Invalidation::Key(key) => usize::from(entries.remove(key).is_some()),
            Invalidation::Prefix(prefix) => {
                let before = entries.len();
                entries.retain(|key, _| !key.starts_with(prefix.as_str()));
                before - entries.len()
            }
        };
        Ok(removed)
    }
}

/// Invalidation counter observed by a reader before it computes a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Best-effort wrapper: every cache failure is logged and treated as a miss or no-op.
#[derive(Clone)]
pub struct ReadThrough {
    cache: Arc<dyn ResponseCache>,
    ttl_seconds: u64,
    generation: Arc<Mutex<u64>>,
}

impl ReadThrough {
    pub fn new(cache: Arc<dyn ResponseCache>, ttl_seconds: u64) -> Self {
        Self {
            cache,
            ttl_seconds,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Capture before loading the data a payload is computed from.
    pub fn generation(&self) -> Generation {
        Generation(*self.generation.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.cache.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                warn!(cache_key = key, error = %err, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!(cache_key = key, "cache hit");
                Some(decoded)
            }
            Err(err) => {
                warn!(cache_key = key, error = %err, "cached payload unreadable; treating as miss");
                None
            }
        }
    }

    /// Store `payload` unless an invalidation ran after `observed` was captured.
    pub fn store<T: Serialize>(&self, key: &str, payload: &T, observed: Generation) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                let err = CacheError::Encode(err.to_string());
                warn!(cache_key = key, error = %err, "cache write failed; continuing uncached");
                return;
            }
        };
        let current = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != observed.0 {
            debug!(cache_key = key, "payload predates an invalidation; not cached");
            return;
        }
        let result = self.cache.set(key, value, self.ttl_seconds);
        drop(current);
        if let Err(err) = result {
            warn!(cache_key = key, error = %err, "cache write failed; continuing uncached");
        }
    }

    /// Drop every listing plus the detective's own profile entry.
    pub fn invalidate_detective(&self, id: &DetectiveId) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        for target in [
            Invalidation::Prefix(LISTING_PREFIX.to_string()),
            Invalidation::Key(profile_key(id)),
        ] {
            match self.cache.invalidate(&target) {
                Ok(removed) => debug!(detective_id = %id, ?target, removed, "cache invalidated"),
                Err(err) => {
                    warn!(detective_id = %id, ?target, error = %err, "cache invalidation failed")
                }
            }
        }
    }
}
