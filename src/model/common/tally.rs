//! Vote counting and result gating.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::model::{common::position::Position, mongodb::Id};

/// Count the votes that look like distinct physical voters.
///
/// Votes are scanned in order. A vote carrying neither an IP nor a
/// fingerprint is ignored. A vote is counted only if none of the fields it
/// carries has been seen on a previously counted vote, and counting it marks
/// its fields as seen.
pub fn unique_vote_count<'a, I>(votes: I) -> usize
where
    I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
{
    let mut seen_ips = HashSet::new();
    let mut seen_signatures = HashSet::new();
    let mut count = 0;

    for (ip, signature) in votes {
        let ip = ip.filter(|s| !s.is_empty());
        let signature = signature.filter(|s| !s.is_empty());
        if ip.is_none() && signature.is_none() {
            continue;
        }
        let ip_seen = ip.map_or(false, |ip| seen_ips.contains(ip));
        let signature_seen = signature.map_or(false, |sig| seen_signatures.contains(sig));
        if ip_seen || signature_seen {
            continue;
        }
        count += 1;
        seen_ips.extend(ip);
        seen_signatures.extend(signature);
    }
    count
}

/// Time left before results become visible to someone who voted at
/// `voted_at`, clamped at zero.
pub fn remaining(voted_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> Duration {
    let left = window - (now - voted_at);
    left.max(Duration::zero())
}

/// Has an election whose last activity was at `last_activity` run its course?
pub fn completion_due(last_activity: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    last_activity + window <= now
}

/// One candidate's entry in a tally.
#[derive(Debug, Clone)]
pub struct Standing<T> {
    pub id: Id,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub votes: usize,
    pub candidate: T,
}

/// Group standings by position, best first.
///
/// Within a position, more votes rank higher; ties go to the earlier
/// application, then to the smaller id. The first entry of each position is
/// its winner.
pub fn rank<T>(standings: Vec<Standing<T>>) -> BTreeMap<Position, Vec<Standing<T>>> {
    let mut by_position: BTreeMap<Position, Vec<Standing<T>>> = BTreeMap::new();
    for standing in standings {
        by_position
            .entry(standing.position)
            .or_default()
            .push(standing);
    }
    for entries in by_position.values_mut() {
        entries.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
    }
    by_position
}
