//! Client sessions and the pending-request table.

mod registry;

pub use registry::{PendingEntry, SessionInfo, SessionRegistry};

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Identifier of one HTTP client session, carried in `Mcp-Session-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Gateway-assigned id substituted for a client's request id on the way to
/// the child. Allocated from a monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(u64);

impl CorrelationKey {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Recover a key from the `id` the child echoed back.
    ///
    /// Keys are always sent as non-negative integers, so anything else
    /// cannot be one of ours.
    #[must_use]
    pub fn from_wire(id: &stdiogate_core::JsonRpcId) -> Option<Self> {
        match id {
            stdiogate_core::JsonRpcId::Number(n) => u64::try_from(*n).ok().map(Self),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_wire(self) -> serde_json::Value {
        serde_json::Value::from(self.0)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stdiogate_core::JsonRpcId;

    #[test]
    fn test_session_id_round_trips_through_header_text() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_correlation_key_from_wire() {
        assert_eq!(
            CorrelationKey::from_wire(&JsonRpcId::Number(12)),
            Some(CorrelationKey::new(12))
        );
        assert_eq!(CorrelationKey::from_wire(&JsonRpcId::Number(-1)), None);
        assert_eq!(
            CorrelationKey::from_wire(&JsonRpcId::String("12".into())),
            None
        );
        assert_eq!(CorrelationKey::from_wire(&JsonRpcId::Null), None);
    }
}
