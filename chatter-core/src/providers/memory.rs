//! In-memory identity/directory provider
//!
//! Backs tests and local tooling; a deployment wires a real provider
//! behind the same traits.

use super::{Credentials, DirectoryService, IdentityProvider, Profile, ProviderError, ProviderResult};
use crate::core_identity::ParticipantId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Registry of profiles held in process memory
#[derive(Default)]
pub struct MemoryDirectory {
    profiles: RwLock<HashMap<ParticipantId, Profile>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile
    pub fn register(&self, profile: Profile) {
        let mut profiles = self.profiles.write().expect("directory lock poisoned");
        profiles.insert(profile.id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.read().expect("directory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdentityProvider for MemoryDirectory {
    async fn authenticate(&self, credentials: &Credentials) -> ProviderResult<Profile> {
        let profiles = self.profiles.read().expect("directory lock poisoned");
        profiles
            .values()
            .find(|p| p.email.as_deref() == Some(credentials.email.as_str()))
            .cloned()
            .ok_or(ProviderError::Unauthenticated)
    }

    async fn lookup(&self, id: &ParticipantId) -> ProviderResult<Option<Profile>> {
        let profiles = self.profiles.read().expect("directory lock poisoned");
        Ok(profiles.get(id).cloned())
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn search(&self, term: &str) -> ProviderResult<Vec<Profile>> {
        let term = term.to_lowercase();
        let profiles = self.profiles.read().expect("directory lock poisoned");

        let mut matches: Vec<Profile> = profiles
            .values()
            .filter(|p| {
                p.display_name.to_lowercase().contains(&term)
                    || p.email.as_deref().is_some_and(|e| e.to_lowercase().contains(&term))
            })
            .cloned()
            .collect();

        matches.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(matches)
    }
}
