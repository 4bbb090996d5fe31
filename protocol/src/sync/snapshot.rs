//! Subjects, snapshots, and the view consumers render.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{format_amount, UNKNOWN};

// ---------------------------------------------------------------------------
// Subject / CacheKey
// ---------------------------------------------------------------------------

/// A ledger account, normalized to lower case.
///
/// Ledger addresses are case-insensitive hex; a wallet may hand us either
/// case, and both must hit the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject(String);

impl Subject {
    /// Normalizes `raw`. Blank input means "no session" and yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an event addressed to `owner` concerns this subject.
    pub fn matches(&self, owner: &str) -> bool {
        Subject::parse(owner).is_some_and(|other| other == *self)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store key: one entry per (subject, asset type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: Subject,
    pub asset_type: String,
}

impl CacheKey {
    pub fn new(subject: Subject, asset_type: &str) -> Self {
        Self {
            subject,
            asset_type: asset_type.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject, self.asset_type)
    }
}

// ---------------------------------------------------------------------------
// CreditSnapshot
// ---------------------------------------------------------------------------

/// One observation of a subject's credit state. A field is `None` when its
/// read failed during this fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSnapshot {
    /// Credit limit in raw asset units.
    pub limit: Option<u128>,
    /// Outstanding usage in raw asset units.
    pub usage: Option<u128>,
    /// Credit score, 0..=255.
    pub score: Option<u8>,
    /// At least one read failed during the fetch that produced this
    /// snapshot. Survives merging: filled-in fields are not fresh.
    #[serde(default)]
    pub partial: bool,
    pub captured_at: DateTime<Utc>,
}

impl CreditSnapshot {
    pub fn new(limit: Option<u128>, usage: Option<u128>, score: Option<u8>) -> Self {
        Self {
            limit,
            usage,
            score,
            partial: limit.is_none() || usage.is_none() || score.is_none(),
            captured_at: Utc::now(),
        }
    }

    /// Fills fields missing from `self` with the ones from `older`.
    pub fn merge_over(self, older: &CreditSnapshot) -> CreditSnapshot {
        CreditSnapshot {
            limit: self.limit.or(older.limit),
            usage: self.usage.or(older.usage),
            score: self.score.or(older.score),
            partial: self.partial,
            captured_at: self.captured_at,
        }
    }

    /// Whether a field `older` knew is missing from `self`.
    pub fn lost_fields_of(&self, older: &CreditSnapshot) -> bool {
        (self.limit.is_none() && older.limit.is_some())
            || (self.usage.is_none() && older.usage.is_some())
            || (self.score.is_none() && older.score.is_some())
    }

    /// Remaining credit (`limit - usage`, floored at zero).
    pub fn available(&self) -> Option<u128> {
        self.limit
            .zip(self.usage)
            .map(|(limit, usage)| limit.saturating_sub(usage))
    }

    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.usage.is_none() && self.score.is_none()
    }
}

// ---------------------------------------------------------------------------
// CreditView
// ---------------------------------------------------------------------------

/// What a feed publishes: raw integers, display strings, and status flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreditView {
    /// `None` means no session.
    pub subject: Option<String>,
    pub limit: Option<u128>,
    pub usage: Option<u128>,
    pub score: Option<u8>,
    pub available: Option<u128>,
    pub limit_display: String,
    pub usage_display: String,
    pub available_display: String,
    /// A fetch is running for this subject.
    pub loading: bool,
    /// Values shown are last-known-good, not confirmed by the latest cycle.
    pub stale: bool,
    pub last_fetch_failed: bool,
    pub captured_at: Option<DateTime<Utc>>,
}

impl Default for CreditView {
    fn default() -> Self {
        Self::no_session()
    }
}

impl CreditView {
    /// The sentinel shown when nobody is connected.
    pub fn no_session() -> Self {
        Self {
            subject: None,
            limit: None,
            usage: None,
            score: None,
            available: None,
            limit_display: UNKNOWN.to_string(),
            usage_display: UNKNOWN.to_string(),
            available_display: UNKNOWN.to_string(),
            loading: false,
            stale: false,
            last_fetch_failed: false,
            captured_at: None,
        }
    }

    /// A freshly bound subject with nothing observed yet.
    pub fn bound(subject: &Subject) -> Self {
        Self {
            subject: Some(subject.to_string()),
            ..Self::no_session()
        }
    }

    /// Whether any credit field is known.
    pub fn has_values(&self) -> bool {
        self.limit.is_some() || self.usage.is_some() || self.score.is_some()
    }

    /// Folds a snapshot in. Known fields are only ever replaced by newer
    /// known values, never by `None`.
    pub fn apply(&mut self, snapshot: &CreditSnapshot, decimals: u8) {
        self.limit = snapshot.limit.or(self.limit);
        self.usage = snapshot.usage.or(self.usage);
        self.score = snapshot.score.or(self.score);
        self.available = self
            .limit
            .zip(self.usage)
            .map(|(limit, usage)| limit.saturating_sub(usage));

        self.limit_display = display(self.limit, decimals);
        self.usage_display = display(self.usage, decimals);
        self.available_display = display(self.available, decimals);

        if self.captured_at.map_or(true, |at| at <= snapshot.captured_at) {
            self.captured_at = Some(snapshot.captured_at);
        }
    }
}

fn display(raw: Option<u128>, decimals: u8) -> String {
    raw.map_or_else(|| UNKNOWN.to_string(), |value| format_amount(value, decimals))
}
