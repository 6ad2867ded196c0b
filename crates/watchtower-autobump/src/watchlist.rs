//! The watchlist state machine.
//!
//! One watchlist row gates auto-bump per `(organization, dependency)`. The
//! release flow classifies the row into an explicit state and maps it to at
//! most one store mutation plus a dispatch decision. Keeping this pure makes
//! the quarantine rules exhaustively testable without a store.

use chrono::{DateTime, Utc};
use watchtower_types::WatchlistRow;

/// Where a `(organization, dependency)` pair stands when a release arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchlistState {
    /// No row: the organization allows transparent auto-bump.
    NoWatchlist,
    /// The one-shot quarantine-next-release flag is armed.
    QuarantineNextPending,
    /// The current version is quarantined and the window is still open.
    CurrentQuarantinedActive,
    /// The current version is quarantined but the window has lapsed.
    /// A missing `quarantine_until` counts as lapsed, as does a timestamp
    /// exactly equal to now (ties expire).
    CurrentQuarantinedExpired,
    /// A row exists with no active quarantine.
    Normal,
}

/// Classify a watchlist row at time `now`.
pub fn classify(row: Option<&WatchlistRow>, now: DateTime<Utc>) -> WatchlistState {
    let Some(row) = row else {
        return WatchlistState::NoWatchlist;
    };

    if row.quarantine_next_release {
        return WatchlistState::QuarantineNextPending;
    }

    if row.is_current_version_quarantined {
        let still_active = row
            .quarantine_until
            .is_some_and(|until| until > now);
        return if still_active {
            WatchlistState::CurrentQuarantinedActive
        } else {
            WatchlistState::CurrentQuarantinedExpired
        };
    }

    WatchlistState::Normal
}

/// The single store write a candidate's transition may require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchlistMutation {
    QuarantineNextRelease {
        watchlist_id: String,
        quarantine_until: DateTime<Utc>,
    },
    ClearQuarantineAndSetLatest {
        watchlist_id: String,
        version: String,
    },
    SetLatestAllowed {
        watchlist_id: String,
        version: String,
    },
}

/// Outcome of one candidate's transition: at most one mutation, and whether
/// a bump PR should be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub mutation: Option<WatchlistMutation>,
    pub dispatch_pr: bool,
}

/// Decide what happens for one candidate.
///
/// `quarantine_until` is the window that would apply if this release enters
/// quarantine (release date + 7 days, or now + 7 days when the release date
/// is unknown).
pub fn plan_candidate(
    row: Option<&WatchlistRow>,
    target_version: &str,
    quarantine_until: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Transition {
    match classify(row, now) {
        WatchlistState::NoWatchlist => Transition {
            mutation: None,
            dispatch_pr: true,
        },
        WatchlistState::QuarantineNextPending => Transition {
            mutation: Some(WatchlistMutation::QuarantineNextRelease {
                watchlist_id: row.expect("classified row").id.clone(),
                quarantine_until,
            }),
            dispatch_pr: false,
        },
        WatchlistState::CurrentQuarantinedActive => Transition {
            mutation: None,
            dispatch_pr: false,
        },
        WatchlistState::CurrentQuarantinedExpired => Transition {
            mutation: Some(WatchlistMutation::ClearQuarantineAndSetLatest {
                watchlist_id: row.expect("classified row").id.clone(),
                version: target_version.to_string(),
            }),
            dispatch_pr: true,
        },
        WatchlistState::Normal => Transition {
            mutation: Some(WatchlistMutation::SetLatestAllowed {
                watchlist_id: row.expect("classified row").id.clone(),
                version: target_version.to_string(),
            }),
            dispatch_pr: true,
        },
    }
}
