//! Correlation tokens for request/reply matching.
//!
//! Uses UUID v7 for time-ordered, unique identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Prefix some brokers prepend to correlation ids they hand back.
pub const BROKER_ID_PREFIX: &str = "ID:";

/// Correlation token linking a reply to the request that caused it.
///
/// Uses UUID v7 which is time-ordered, making it ideal for:
/// - Log correlation
/// - Request/reply matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// String form placed in the envelope.
    pub fn to_wire(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// Get timestamp from UUID v7 (milliseconds since Unix epoch)
    pub fn timestamp_ms(&self) -> Option<u64> {
        let bytes = self.0.as_bytes();
        if (bytes[6] >> 4) == 7 {
            let ts = ((bytes[0] as u64) << 40)
                | ((bytes[1] as u64) << 32)
                | ((bytes[2] as u64) << 24)
                | ((bytes[3] as u64) << 16)
                | ((bytes[4] as u64) << 8)
                | (bytes[5] as u64);
            Some(ts)
        } else {
            None
        }
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Source of fresh correlation tokens.
///
/// Implementations must be callable concurrently and must not hand out the
/// same token twice within the process lifetime.
pub trait TokenGenerator: Send + Sync {
    /// Produce the next token. Never fails.
    fn next_token(&self) -> CorrelationId;
}

/// Default generator backed by UUID v7.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTokenGenerator;

impl TokenGenerator for UuidTokenGenerator {
    fn next_token(&self) -> CorrelationId {
        CorrelationId::new()
    }
}

/// Why a correlation string could not be turned into a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedToken {
    #[error("correlation id is empty")]
    Empty,
    #[error("correlation id {raw:?} is not a valid token")]
    Unparseable { raw: String },
}

/// Strips transport decoration from inbound correlation strings.
///
/// Matching happens only on normalized tokens; call sites never deal with
/// prefixes themselves.
#[derive(Debug, Clone)]
pub struct TokenNormalizer {
    prefixes: Vec<String>,
}

impl TokenNormalizer {
    /// Normalizer stripping the given prefixes (empty entries are ignored).
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Prefixes this normalizer strips.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Turn a raw correlation string from the wire into a token.
    ///
    /// Whitespace is trimmed and known prefixes are removed repeatedly
    /// (`ID:ID:x` becomes `x`) before parsing.
    pub fn normalize(&self, raw: &str) -> Result<CorrelationId, MalformedToken> {
        let mut rest = raw.trim();
        'strip: loop {
            for prefix in &self.prefixes {
                if let Some(stripped) = rest.strip_prefix(prefix.as_str()) {
                    rest = stripped.trim_start();
                    continue 'strip;
                }
            }
            break;
        }

        if rest.is_empty() {
            return Err(MalformedToken::Empty);
        }

        CorrelationId::parse(rest).map_err(|_| MalformedToken::Unparseable {
            raw: raw.to_string(),
        })
    }
}

impl Default for TokenNormalizer {
    fn default() -> Self {
        Self::new([BROKER_ID_PREFIX])
    }
}
