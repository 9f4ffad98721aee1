/*!
 # Timer table

 A small periodic trigger table keyed by [`TriggerKey`]. Every entry fires
 at fixed offsets within a repeating period; the scheduler installs daily
 entries whose offsets are seconds after UTC midnight.
*/

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use crate::schedule::TriggerKey;

/// Period of a daily entry, in seconds
pub const PERIOD_DAY: u32 = 86_400;

/// Substrate the scheduler installs its triggers into
pub trait TimerSubstrate {
    /// Fires `key` whenever epoch seconds modulo `period` hits one of `offsets`.
    /// An existing entry under `key` is replaced. A zero `period` is refused.
    fn insert(&mut self, period: u32, offsets: BTreeSet<u32>, key: TriggerKey);

    /// Like [`TimerSubstrate::insert`], but offsets count from `now` instead of the epoch
    fn insert_from_now(&mut self, period: u32, offsets: BTreeSet<u32>, key: TriggerKey, now: i64);

    /// Removes `key`; returns whether it was present
    fn remove(&mut self, key: &TriggerKey) -> bool;

    fn remove_all(&mut self);
}

/// A trigger that came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub key: TriggerKey,
    /// Epoch seconds the trigger was due at
    pub at: i64,
}

#[derive(Debug, Clone)]
struct Entry {
    period: u32,
    offsets: BTreeSet<u32>,
    anchor: i64,
}

impl Entry {
    /// Due instants in `(after, until]`, at most one period's worth
    fn due(&self, after: i64, until: i64) -> Vec<i64> {
        let period = i64::from(self.period);
        let after = after.max(until - period);
        let period_start = after - (after - self.anchor).rem_euclid(period);

        let mut due = Vec::new();
        for &offset in &self.offsets {
            let mut at = period_start + i64::from(offset);
            if at <= after {
                at += period;
            }
            while at <= until {
                due.push(at);
                at += period;
            }
        }
        due
    }
}

/// In-process [`TimerSubstrate`] driven by explicit polling
#[derive(Debug, Default)]
pub struct CronTable {
    entries: BTreeMap<TriggerKey, Entry>,
    last_poll: Option<i64>,
}

impl CronTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &TriggerKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn offsets(&self, key: &TriggerKey) -> Option<&BTreeSet<u32>> {
        self.entries.get(key).map(|e| &e.offsets)
    }

    /// Installed keys in order
    pub fn keys(&self) -> impl Iterator<Item = &TriggerKey> {
        self.entries.keys()
    }

    fn add(&mut self, key: TriggerKey, period: u32, offsets: BTreeSet<u32>, anchor: i64) {
        if period == 0 {
            warn!("Refusing {} with a zero period", key);
            return;
        }
        self.entries.insert(
            key,
            Entry {
                period,
                offsets,
                anchor,
            },
        );
    }

    /// Returns every trigger due since the previous poll, oldest first.
    ///
    /// The first poll only records `now`. When the gap since the previous poll
    /// exceeds an entry's period, only its most recent period is replayed.
    pub fn poll(&mut self, now: i64) -> Vec<Fired> {
        let Some(last) = self.last_poll.replace(now) else {
            trace!("Timer table primed at {}", now);
            return Vec::new();
        };
        if now <= last {
            return Vec::new();
        }

        let mut fired: Vec<Fired> = self
            .entries
            .iter()
            .flat_map(|(key, entry)| {
                entry.due(last, now).into_iter().map(|at| Fired {
                    key: key.clone(),
                    at,
                })
            })
            .collect();
        fired.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.key.cmp(&b.key)));
        fired
    }
}

impl TimerSubstrate for CronTable {
    fn insert(&mut self, period: u32, offsets: BTreeSet<u32>, key: TriggerKey) {
        debug!("Inserting {} with {} offset(s)", key, offsets.len());
        self.add(key, period, offsets, 0);
    }

    fn insert_from_now(&mut self, period: u32, offsets: BTreeSet<u32>, key: TriggerKey, now: i64) {
        debug!("Inserting {} every {}s from now", key, period);
        self.add(key, period, offsets, now);
    }

    fn remove(&mut self, key: &TriggerKey) -> bool {
        self.entries.remove(key).is_some()
    }

    fn remove_all(&mut self) {
        self.entries.clear();
    }
}
