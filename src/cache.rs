use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::identity::ContentIdentity;
use crate::models::ApiTranslation;
use crate::settings::ConfigStore;

/// Process-wide translation results keyed by content identity.
///
/// Entries never expire; the user clears the map through the persisted
/// clear-cache flag.
#[derive(Default)]
pub struct TranslationCache {
    entries: Mutex<HashMap<ContentIdentity, ApiTranslation>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &ContentIdentity) -> Option<ApiTranslation> {
        self.lock().get(identity).cloned()
    }

    /// Stores `result` unless it carries an error marker. Returns whether the
    /// entry was written.
    pub fn put(&self, identity: ContentIdentity, result: ApiTranslation) -> bool {
        if result.is_error() {
            debug!("not caching error result for {}", identity);
            return false;
        }
        self.lock().insert(identity, result);
        true
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clears the cache when the persisted flag is set, then resets the flag.
    pub fn clear_if_flagged(&self, config: &dyn ConfigStore) -> Result<bool> {
        if !config.clear_cache_flag()? {
            return Ok(false);
        }
        let dropped = {
            let mut entries = self.lock();
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        config.set_clear_cache_flag(false)?;
        debug!("translation cache cleared ({} entries)", dropped);
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ContentIdentity, ApiTranslation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
