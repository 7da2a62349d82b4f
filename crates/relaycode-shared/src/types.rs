use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::ROOM_CODE_LEN;

/// Opaque 128-bit client session identifier, rendered as a hex/URN string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 6-character uppercase alphanumeric room code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Draws a fresh code from the first `ROOM_CODE_LEN` hex characters of a
    /// fresh UUID, uppercased. Collisions are handled by the caller retrying.
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..ROOM_CODE_LEN].to_ascii_uppercase())
    }

    /// Normalizes an arbitrary-case room code supplied by a client.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_uppercase_and_correct_length() {
        let code = RoomCode::generate();
        assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
        assert_eq!(code.as_str(), code.as_str().to_ascii_uppercase());
    }

    #[test]
    fn normalize_uppercases_mixed_case_input() {
        let code = RoomCode::normalize("abc123");
        assert_eq!(code.as_str(), "ABC123");
    }

    #[test]
    fn normalize_trims_whitespace() {
        let code = RoomCode::normalize("  abc123  ");
        assert_eq!(code.as_str(), "ABC123");
    }
}
