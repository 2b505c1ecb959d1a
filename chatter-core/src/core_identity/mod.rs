/*
    core_identity - Canonical conversation identity

    Derives the symmetric identifier shared by a pair of participants.
    A conversation has no surrogate id: the key IS the identity, and
    both sides of the pair always derive the same one.

    Encoding:
    - participant ids joined with '_', lexicographically smaller id first
    - the separator is forbidden inside participant ids so the key
      always splits back into exactly two ids
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator between the two participant ids inside a key
const KEY_SEPARATOR: char = '_';

/// Errors for conversation identity operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Participant id is unusable for key derivation
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Key does not decompose into the expected pair
    #[error("Malformed conversation key: {0}")]
    MalformedKey(String),
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Stable identifier of a participant, owned by the Identity Provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        ParticipantId(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        ParticipantId(s)
    }
}

/// Canonical, order-independent identifier of a two-party conversation
///
/// `derive(a, b)` and `derive(b, a)` always produce the same key, and the
/// key never changes once computed. The two encoded ids are recoverable
/// with [`ConversationKey::split`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Derive the canonical key for an unordered pair of participants
    ///
    /// Fails with `InvalidParticipant` when the ids are equal, when either
    /// id is empty, or when an id contains the key separator.
    pub fn derive(a: &ParticipantId, b: &ParticipantId) -> IdentityResult<Self> {
        validate_participant(a)?;
        validate_participant(b)?;

        if a == b {
            return Err(IdentityError::InvalidParticipant(format!(
                "self-conversation not permitted: {}",
                a
            )));
        }

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        Ok(ConversationKey(format!("{}{}{}", lo, KEY_SEPARATOR, hi)))
    }

    /// Reconstruct a key from its string form, re-validating the encoding
    pub fn parse(raw: &str) -> IdentityResult<Self> {
        let (lo, hi) = raw
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| IdentityError::MalformedKey(format!("missing separator: {}", raw)))?;

        let lo = ParticipantId::new(lo);
        let hi = ParticipantId::new(hi);
        let key = Self::derive(&lo, &hi)
            .map_err(|e| IdentityError::MalformedKey(e.to_string()))?;

        if key.0 != raw {
            return Err(IdentityError::MalformedKey(format!(
                "non-canonical key: {}",
                raw
            )));
        }

        Ok(key)
    }

    /// Recover the counter-party id given one known participant
    ///
    /// Fails with `MalformedKey` when `known` is not one of the two ids
    /// encoded in this key.
    pub fn split(&self, known: &ParticipantId) -> IdentityResult<ParticipantId> {
        let (lo, hi) = self.participants();

        if known == &lo {
            Ok(hi)
        } else if known == &hi {
            Ok(lo)
        } else {
            Err(IdentityError::MalformedKey(format!(
                "{} is not a participant of {}",
                known, self.0
            )))
        }
    }

    /// The encoded participant pair, smaller id first
    pub fn participants(&self) -> (ParticipantId, ParticipantId) {
        // derive() guarantees exactly one separator
        let (lo, hi) = self
            .0
            .split_once(KEY_SEPARATOR)
            .expect("canonical key always contains a separator");
        (ParticipantId::new(lo), ParticipantId::new(hi))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_participant(id: &ParticipantId) -> IdentityResult<()> {
    if id.is_empty() {
        return Err(IdentityError::InvalidParticipant(
            "empty participant id".to_string(),
        ));
    }

    if id.0.contains(KEY_SEPARATOR) {
        return Err(IdentityError::InvalidParticipant(format!(
            "participant id contains reserved separator '{}': {}",
            KEY_SEPARATOR, id
        )));
    }

    Ok(())
}
