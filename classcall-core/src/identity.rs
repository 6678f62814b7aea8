//! Participant identity
//!
//! Calls are addressed by participant id on a shared signaling topic. The
//! empty string is reserved on the wire as the broadcast address, so it is
//! never a valid participant.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error;

/// Identity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Empty or whitespace-only id
    #[error("Participant id cannot be empty")]
    Empty,
}

/// Opaque identifier of a call participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a participant id, rejecting the reserved broadcast address
    ///
    /// # Errors
    ///
    /// Returns error if the id is empty
    pub fn new(s: impl Into<String>) -> Result<Self, IdentityError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(s))
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a wire recipient field addresses this participant
    ///
    /// A recipient matches when it equals this id or is the broadcast
    /// address (`""`).
    #[must_use]
    pub fn accepts_recipient(&self, to: &str) -> bool {
        to.is_empty() || to == self.0
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl TryFrom<&str> for ParticipantId {
    type Error = IdentityError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// The two parties of a call
///
/// Immutable once built; a call always has exactly one caller and one
/// callee and they are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    caller: ParticipantId,
    callee: ParticipantId,
}

impl Participants {
    /// Pair a caller with a callee, or `None` if they are the same participant
    #[must_use]
    pub fn new(caller: ParticipantId, callee: ParticipantId) -> Option<Self> {
        if caller == callee {
            return None;
        }
        Some(Self { caller, callee })
    }

    /// Participant who placed the call
    #[must_use]
    pub fn caller(&self) -> &ParticipantId {
        &self.caller
    }

    /// Participant who received the call
    #[must_use]
    pub fn callee(&self) -> &ParticipantId {
        &self.callee
    }

    /// Whether `id` is one of the two parties
    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        &self.caller == id || &self.callee == id
    }

    /// The party that is not `me`, or `None` if `me` is not in the call
    #[must_use]
    pub fn other_than(&self, me: &ParticipantId) -> Option<&ParticipantId> {
        if &self.caller == me {
            Some(&self.callee)
        } else if &self.callee == me {
            Some(&self.caller)
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::new(s).unwrap()
    }

    #[test]
    fn test_participant_id_rejects_broadcast_address() {
        assert_eq!(ParticipantId::new(""), Err(IdentityError::Empty));
        assert_eq!(ParticipantId::new("   "), Err(IdentityError::Empty));
        assert_eq!(id("teacher-42").as_str(), "teacher-42");
    }

    #[test]
    fn test_accepts_recipient() {
        let me = id("alice");
        assert!(me.accepts_recipient("alice"));
        assert!(me.accepts_recipient(""));
        assert!(!me.accepts_recipient("bob"));
        assert!(!me.accepts_recipient("alice "));
    }

    #[test]
    fn test_participants_other_than() {
        let pair = Participants::new(id("alice"), id("bob")).unwrap();
        assert_eq!(pair.other_than(&id("alice")), Some(&id("bob")));
        assert_eq!(pair.other_than(&id("bob")), Some(&id("alice")));
        assert_eq!(pair.other_than(&id("carol")), None);
        assert!(Participants::new(id("alice"), id("alice")).is_none());
    }

    #[test]
    fn test_participant_id_serialization() {
        let json = serde_json::to_string(&id("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
        let back: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id("alice"));
        assert!(serde_json::from_str::<ParticipantId>("\"\"").is_err());
    }
}
