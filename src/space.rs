//! Spaces: isolated storage/query scopes.
//!
//! Each space owns its own term and quad tables in the relational store and
//! its own dataset in the triple store. The persisted [`SpaceRecord`] carries
//! the space's sync state so a degraded space stays degraded across restarts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::SpaceError;

/// Maximum length of a space name.
pub const MAX_SPACE_NAME: usize = 64;

/// A validated space name.
///
/// Space names end up in table names and URL paths, so they are restricted
/// to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpaceId(String);

impl SpaceId {
    pub fn new(name: impl Into<String>) -> Result<Self, SpaceError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty".to_string())
        } else if name.len() > MAX_SPACE_NAME {
            Some(format!("name is longer than {MAX_SPACE_NAME} characters"))
        } else if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            Some("name must start with a letter or digit".to_string())
        } else if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
        {
            Some(format!("character {c:?} is not allowed"))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(SpaceError::InvalidName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SpaceId {
    type Error = SpaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SpaceId::new(value)
    }
}

impl From<SpaceId> for String {
    fn from(value: SpaceId) -> Self {
        value.0
    }
}

impl std::str::FromStr for SpaceId {
    type Err = SpaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceId::new(s)
    }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What still needs to be copied from the relational store to the triple store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingResync {
    /// The whole space must be rebuilt.
    Space,
    /// Only these outer units (by root IRI) are stale.
    Units(BTreeSet<String>),
}

impl PendingResync {
    /// Merge another pending scope into this one.
    pub fn merge(&mut self, other: PendingResync) {
        match other {
            PendingResync::Space => *self = PendingResync::Space,
            PendingResync::Units(theirs) => {
                if let PendingResync::Units(mine) = self {
                    mine.extend(theirs);
                }
            }
        }
    }
}

/// Whether the triple store reflects the relational store for a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncState {
    #[default]
    InSync,
    /// The relational store committed changes the triple store has not seen.
    Degraded {
        /// Seconds since UNIX epoch when the space first became degraded.
        since: u64,
        pending: PendingResync,
    },
}

impl SyncState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SyncState::Degraded { .. })
    }

    /// Record another stale scope, keeping the original `since`.
    pub fn degrade(&mut self, pending: PendingResync, now: u64) {
        match self {
            SyncState::InSync => {
                *self = SyncState::Degraded {
                    since: now,
                    pending,
                }
            }
            SyncState::Degraded { pending: mine, .. } => mine.merge(pending),
        }
    }

    /// Mark one unit as resynced. Returns `true` if the space is now in sync.
    ///
    /// A whole-space pending scope is not cleared by a unit resync.
    pub fn unit_resynced(&mut self, root: &str) -> bool {
        if let SyncState::Degraded {
            pending: PendingResync::Units(roots),
            ..
        } = self
        {
            roots.remove(root);
            if roots.is_empty() {
                *self = SyncState::InSync;
            }
        }
        !self.is_degraded()
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::InSync => write!(f, "in-sync"),
            SyncState::Degraded {
                since,
                pending: PendingResync::Space,
            } => write!(f, "degraded since {since} (whole space pending)"),
            SyncState::Degraded {
                since,
                pending: PendingResync::Units(roots),
            } => write!(f, "degraded since {since} ({} unit(s) pending)", roots.len()),
        }
    }
}

/// Persisted per-space metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub name: SpaceId,
    /// Seconds since UNIX epoch.
    pub created_at: u64,
    /// Next term id to hand out (term ids start at 1).
    pub next_term_id: u64,
    pub sync: SyncState,
    /// Committed writes whose mirror has not finished, by write id. An
    /// entry still present when the store opens belongs to a write that
    /// was interrupted and is folded into `sync`.
    pub in_flight: BTreeMap<u64, PendingResync>,
    pub next_write_id: u64,
}

impl SpaceRecord {
    pub fn new(name: SpaceId) -> Self {
        Self {
            name,
            created_at: unix_now(),
            next_term_id: 1,
            sync: SyncState::InSync,
            in_flight: BTreeMap::new(),
            next_write_id: 1,
        }
    }

    /// Fold every unfinished write into the sync state. Returns how many
    /// there were.
    pub fn recover_in_flight(&mut self, now: u64) -> usize {
        let interrupted = std::mem::take(&mut self.in_flight);
        let count = interrupted.len();
        for pending in interrupted.into_values() {
            self.sync.degrade(pending, now);
        }
        count
    }
}

/// Seconds since UNIX epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
