//! Reading progress carried through sync as a sidecar document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reading position for one book on one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    /// Reader-specific location token (CFI, page index, ...)
    pub location: String,

    /// Fraction read, clamped to `0.0..=1.0`
    pub percentage: f32,

    /// When the reader last moved
    pub updated_at: DateTime<Utc>,
}

impl ReadingProgress {
    pub fn new(location: impl Into<String>, percentage: f32) -> Self {
        Self::at(location, percentage, Utc::now())
    }

    pub fn at(location: impl Into<String>, percentage: f32, updated_at: DateTime<Utc>) -> Self {
        Self {
            location: location.into(),
            percentage: percentage.clamp(0.0, 1.0),
            updated_at,
        }
    }

    /// Reconcile progress recorded on two devices.
    ///
    /// Last write wins by `updated_at`; on a tie the further position wins.
    pub fn merge(local: Option<&Self>, remote: Option<&Self>) -> Option<Self> {
        match (local, remote) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (Some(local), Some(remote)) => {
                let winner = match local.updated_at.cmp(&remote.updated_at) {
                    std::cmp::Ordering::Greater => local,
                    std::cmp::Ordering::Less => remote,
                    std::cmp::Ordering::Equal => {
                        if remote.percentage > local.percentage {
                            remote
                        } else {
                            local
                        }
                    }
                };
                Some(winner.clone())
            }
        }
    }
}
