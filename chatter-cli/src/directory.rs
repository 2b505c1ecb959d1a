//! File-backed identity/directory provider
//!
//! Profiles live in a users.json next to the database so separate CLI
//! invocations see the same directory. A real deployment replaces this
//! with its identity service behind the same traits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chatter_core::providers::{
    Credentials, DirectoryService, IdentityProvider, Profile, ProviderError, ProviderResult,
};
use chatter_core::ParticipantId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

pub struct JsonDirectory {
    path: PathBuf,
    profiles: RwLock<HashMap<ParticipantId, Profile>>,
}

impl JsonDirectory {
    /// Load the directory file, or start empty when it does not exist
    pub fn open(path: PathBuf) -> Result<Self> {
        let profiles = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let list: Vec<Profile> =
                serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
            list.into_iter().map(|p| (p.id.clone(), p)).collect()
        } else {
            HashMap::new()
        };

        Ok(JsonDirectory { path, profiles: RwLock::new(profiles) })
    }

    /// Add or replace a profile and persist the file
    pub fn upsert(&self, profile: Profile) -> Result<()> {
        let mut profiles = self.profiles.write().expect("directory lock poisoned");
        profiles.insert(profile.id.clone(), profile);

        let mut list: Vec<&Profile> = profiles.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&list)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("writing {}", self.path.display()))?;

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.profiles.read().expect("directory lock poisoned").len()
    }
}

#[async_trait]
impl IdentityProvider for JsonDirectory {
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
impl DirectoryService for JsonDirectory {
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
