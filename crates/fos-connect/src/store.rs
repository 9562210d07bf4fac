//! Profile Store
//!
//! Durable keyed storage of profiles. Every mutation, local or remote,
//! is published on the change feed as a full snapshot.

use crate::profile::Profile;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Snapshot of the store
pub type ProfileMap = HashMap<Uuid, Profile>;

/// Profile persistence
pub trait ProfileStore: Send + Sync {
    /// Every stored profile
    fn all(&self) -> ProfileMap;

    /// A single profile
    fn profile(&self, id: Uuid) -> Option<Profile>;

    fn contains(&self, id: Uuid) -> bool {
        self.profile(id).is_some()
    }

    /// Insert or replace profiles
    fn save(&self, profiles: &[Profile]) -> Result<(), StoreError>;

    /// Delete profiles, ignoring unknown ids
    fn remove(&self, ids: &[Uuid]);

    /// Change feed, one snapshot per mutation
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProfileMap>;
}

/// In-memory store
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<ProfileMap>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProfileMap>>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `profiles`, without notifying anyone
    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.profiles.lock() {
            map.extend(profiles.into_iter().map(|p| (p.id, p)));
        }
        store
    }

    fn notify(&self, snapshot: ProfileMap) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

impl ProfileStore for MemoryProfileStore {
    fn all(&self) -> ProfileMap {
        self.profiles.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn profile(&self, id: Uuid) -> Option<Profile> {
        self.profiles.lock().ok()?.get(&id).cloned()
    }

    fn save(&self, profiles: &[Profile]) -> Result<(), StoreError> {
        if profiles.is_empty() {
            return Ok(());
        }
        if let Some(placeholder) = profiles.iter().find(|p| p.is_placeholder) {
            return Err(StoreError::Placeholder(placeholder.id));
        }

        let snapshot = {
            let mut map = self.profiles.lock().map_err(|_| StoreError::Unavailable)?;
            for profile in profiles {
                debug!("Saving profile {}", profile.log_description());
                map.insert(profile.id, profile.clone());
            }
            map.clone()
        };
        self.notify(snapshot);
        Ok(())
    }

    fn remove(&self, ids: &[Uuid]) {
        let snapshot = {
            let Ok(mut map) = self.profiles.lock() else {
                return;
            };
            let before = map.len();
            for id in ids {
                map.remove(id);
            }
            if map.len() == before {
                return;
            }
            map.clone()
        };
        debug!("Removed profiles {:?}", ids);
        self.notify(snapshot);
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProfileMap> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }
}

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Refusing to save placeholder profile {0}")]
    Placeholder(Uuid),

    #[error("Profile store unavailable")]
    Unavailable,
}
