use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use super::classify::ElementKind;
use crate::page::ElementId;

/// What an element showed before a translation replaced it.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalRecord {
    pub kind: ElementKind,
    /// Data URL of the image as it was sent for translation.
    pub data: String,
}

#[derive(Default)]
struct Claims {
    claimed: HashSet<ElementId>,
    finished_hashes: HashSet<String>,
    originals: HashMap<ElementId, OriginalRecord>,
}

/// Page-local bookkeeping shared by the watcher and overlay hooks.
///
/// A claimed element is being (or has been) handled and is skipped by later
/// scans until something releases it. Finished hashes remember content that
/// already shows a translation, so a re-attached element is not sent again.
#[derive(Default)]
pub struct ClaimRegistry {
    inner: Mutex<Claims>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the element is already claimed.
    pub fn claim(&self, id: ElementId) -> bool {
        self.lock().claimed.insert(id)
    }

    pub fn unclaim(&self, id: ElementId) -> bool {
        self.lock().claimed.remove(&id)
    }

    pub fn is_claimed(&self, id: ElementId) -> bool {
        self.lock().claimed.contains(&id)
    }

    pub fn clear_claims(&self) {
        self.lock().claimed.clear();
    }

    pub fn mark_finished(&self, hash: &str) {
        if !hash.is_empty() {
            self.lock().finished_hashes.insert(hash.to_string());
        }
    }

    pub fn is_finished(&self, hash: &str) -> bool {
        self.lock().finished_hashes.contains(hash)
    }

    pub fn record_original(&self, id: ElementId, record: OriginalRecord) {
        self.lock().originals.insert(id, record);
    }

    pub fn take_originals(&self) -> Vec<(ElementId, OriginalRecord)> {
        let mut originals: Vec<_> = self.lock().originals.drain().collect();
        originals.sort_by_key(|(id, _)| *id);
        originals
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Claims> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
