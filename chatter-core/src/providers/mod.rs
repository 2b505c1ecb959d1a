//! Consumed external interfaces
//!
//! The engine never authenticates callers or searches the user directory
//! itself; both concerns belong to external collaborators reached through
//! these traits. The core only caches display snapshots obtained here
//! inside mirror entries, and refreshes them lazily.

use crate::core_identity::ParticipantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod memory;

pub use memory::MemoryDirectory;

/// Errors from external providers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider cannot be reached; transient
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Credentials did not resolve to a participant
    #[error("Authentication failed")]
    Unauthenticated,
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Caller credentials, opaque to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub secret: String,
}

/// A participant's externally owned identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Profile {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            email: None,
        }
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Authenticates callers and resolves participant profiles
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve credentials to a participant profile
    async fn authenticate(&self, credentials: &Credentials) -> ProviderResult<Profile>;

    /// Look up a participant's current profile
    async fn lookup(&self, id: &ParticipantId) -> ProviderResult<Option<Profile>>;
}

/// Participant search, consumed by the Presentation Layer to obtain the
/// counter-party id passed into key derivation
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Case-insensitive search over names and emails
    async fn search(&self, term: &str) -> ProviderResult<Vec<Profile>>;
}
