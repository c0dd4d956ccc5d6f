use thiserror::Error;

use super::types::Tier;

#[derive(Debug, Error)]
/// Errors returned by tier stores.
///
/// None of these ever reach a client: the resolver treats any tier error that
/// survives retries as a miss at that tier.
pub enum TierError {
    /// Retryable failure talking to the tier (timeouts, I/O, overload).
    #[error("{tier} tier unavailable: {reason}")]
    Transient {
        /// Tier that failed.
        tier: Tier,
        /// Error message.
        reason: String,
    },

    /// Write attempted against a tier that is read-only for this service.
    #[error("{tier} tier is read-only")]
    ReadOnly {
        /// Tier that rejected the write.
        tier: Tier,
    },

    /// Stored value could not be decoded (e.g. missing metadata).
    #[error("corrupt {tier} record for {key}: {reason}")]
    Corrupt {
        /// Tier holding the record.
        tier: Tier,
        /// Key of the record.
        key: String,
        /// Error message.
        reason: String,
    },
}

impl TierError {
    pub fn transient(tier: Tier, reason: impl Into<String>) -> Self {
        Self::Transient {
            tier,
            reason: reason.into(),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            TierError::Transient { tier, .. }
            | TierError::ReadOnly { tier }
            | TierError::Corrupt { tier, .. } => *tier,
        }
    }
}
