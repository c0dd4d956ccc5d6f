use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    NEGATIVE_MAX_AGE_SECS, NEGATIVE_STALE_WHILE_REVALIDATE_SECS, POSITIVE_MAX_AGE_SECS,
};
use crate::hashing::hash_cache_key;

/// Logical content namespace. Each namespace maps to its own key space in every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Namespace {
    #[default]
    Images,
    Downloads,
}

impl Namespace {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Images => "IMAGES",
            Namespace::Downloads => "DOWNLOADS",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IMAGES" => Ok(Self::Images),
            "DOWNLOADS" => Ok(Self::Downloads),
            _ => Err(format!("Unknown namespace: {}", s)),
        }
    }
}

/// Immutable address of one object: a namespace plus the request path.
///
/// The path is stored with exactly one leading `/`, so `"a.png"` and `"/a.png"` are
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    path: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, path: &str) -> Self {
        let trimmed = path.trim_start_matches('/');
        Self {
            namespace,
            path: format!("/{}", trimmed),
        }
    }

    #[inline]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Key inside the origin store: `IMAGES/cat.png`.
    pub fn origin_key(&self) -> String {
        format!("{}{}", self.namespace, self.path)
    }

    /// Key inside the distributed store: `<prefix>/IMAGES/cat.png`.
    pub fn distributed_key(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.origin_key()
        } else {
            format!("{}/{}{}", prefix.trim_end_matches('/'), self.namespace, self.path)
        }
    }

    /// 32-byte digest used by the local tier.
    pub fn digest(&self) -> [u8; 32] {
        hash_cache_key(self.namespace.as_str(), &self.path)
    }

    /// Extension of the last path segment, lowercased (`"png"` for `/a/b.PNG`).
    pub fn extension(&self) -> Option<String> {
        let file = self.path.rsplit('/').next()?;
        let (stem, ext) = file.rsplit_once('.')?;
        if stem.is_empty() && ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.namespace, self.path)
    }
}

/// One immutable cached object.
///
/// `content_type` and `content_length` are fixed when the entry is first read from the
/// origin and are carried verbatim through every tier afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bytes: Bytes,
    pub content_type: String,
    pub content_length: u64,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        Self {
            content_length: bytes.len() as u64,
            bytes,
            content_type: content_type.into(),
            cached_at: Utc::now(),
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.content_length
    }
}

/// A cache layer, ordered fastest / most volatile first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Distributed,
    Origin,
}

impl Tier {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Distributed => "distributed",
            Tier::Origin => "origin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw answer from a single tier store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierLookup {
    Hit(CacheEntry),
    /// The tier holds a cached "not found". `stale` is set once the negative freshness
    /// window has passed but the stale window has not.
    Negative { stale: bool },
    Miss,
}

/// Outcome of checking one tier, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierResult {
    Hit { entry: CacheEntry, tier: Tier },
    Miss,
}

impl TierResult {
    #[inline]
    pub fn is_hit(&self) -> bool {
        matches!(self, TierResult::Hit { .. })
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            TierResult::Hit { tier, .. } => Some(*tier),
            TierResult::Miss => None,
        }
    }
}

/// Freshness directive rendered into `Cache-Control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDirective {
    pub max_age: Duration,
    pub stale_while_revalidate: Option<Duration>,
    pub immutable: bool,
}

impl CacheDirective {
    pub const fn positive() -> Self {
        Self {
            max_age: Duration::from_secs(POSITIVE_MAX_AGE_SECS),
            stale_while_revalidate: None,
            immutable: true,
        }
    }

    pub const fn negative() -> Self {
        Self {
            max_age: Duration::from_secs(NEGATIVE_MAX_AGE_SECS),
            stale_while_revalidate: Some(Duration::from_secs(
                NEGATIVE_STALE_WHILE_REVALIDATE_SECS,
            )),
            immutable: false,
        }
    }

    /// How long a tier may keep the response at all.
    pub fn retention(&self) -> Duration {
        self.max_age + self.stale_while_revalidate.unwrap_or_default()
    }

    pub fn header_value(&self) -> String {
        let mut value = format!("public, max-age={}", self.max_age.as_secs());
        if let Some(swr) = self.stale_while_revalidate {
            value.push_str(&format!(", stale-while-revalidate={}", swr.as_secs()));
        }
        if self.immutable {
            value.push_str(", immutable");
        }
        value
    }
}

/// Where a response came from, as reported in the status header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    HitLocal,
    HitDistributed,
    HitOrigin,
    NegativeHit,
    Miss,
}

impl CacheStatus {
    #[inline]
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::HitLocal => "HIT_LOCAL",
            CacheStatus::HitDistributed => "HIT_DISTRIBUTED",
            CacheStatus::HitOrigin => "HIT_ORIGIN",
            CacheStatus::NegativeHit => "NEGATIVE_HIT",
            CacheStatus::Miss => "MISS",
        }
    }

    #[inline]
    pub fn is_cache_hit(&self) -> bool {
        matches!(
            self,
            CacheStatus::HitLocal | CacheStatus::HitDistributed | CacheStatus::NegativeHit
        )
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header_value())
    }
}
