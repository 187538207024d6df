//! Live contact store with aging, track history, and snapshot persistence.
//!
//! Pure logic, no I/O of its own: persistence goes through the `CacheStore`
//! trait implemented by the caller. Safe to share between transport workers
//! and the maintenance scheduler behind an `Arc`.
//!
//! Lock order is always contacts, then tracks.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::*;

/// Default number of points kept per track.
pub const DEFAULT_TRACK_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Persistence seam
// ---------------------------------------------------------------------------

/// Opaque snapshot persistence for the contact database.
pub trait CacheStore {
    fn save(&self, contacts: &[Contact]) -> Result<()>;
    fn load(&self) -> Result<Vec<Contact>>;
}

// ---------------------------------------------------------------------------
// Tracks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub timestamp: f64,
}

/// Capped position history for one contact. Oldest point dropped first.
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub label: String,
    pub points: VecDeque<TrackPoint>,
    #[serde(skip)]
    capacity: usize,
}

impl Track {
    pub fn new(label: &str, capacity: usize) -> Self {
        Track {
            label: label.to_string(),
            points: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, point: TrackPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Contact database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Authoritative map of live contacts keyed by label.
#[derive(Debug)]
pub struct ContactDb {
    contacts: RwLock<HashMap<String, Contact>>,
    tracks: RwLock<HashMap<String, Track>>,
    track_capacity: usize,
}

impl Default for ContactDb {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_CAPACITY)
    }
}

impl ContactDb {
    pub fn new(track_capacity: usize) -> Self {
        ContactDb {
            contacts: RwLock::new(HashMap::new()),
            tracks: RwLock::new(HashMap::new()),
            track_capacity,
        }
    }

    /// Create or merge a contact, stamped with the current time.
    pub fn upsert(&self, label: &str, update: &ContactUpdate) -> UpsertOutcome {
        self.upsert_at(label, update, now())
    }

    pub fn upsert_at(&self, label: &str, update: &ContactUpdate, timestamp: f64) -> UpsertOutcome {
        let mut contacts = self.contacts.write();
        match contacts.get_mut(label) {
            Some(contact) => {
                contact.apply(update, timestamp);
                UpsertOutcome::Updated
            }
            None => {
                let mut contact = Contact::new(label, update.source, timestamp);
                contact.apply(update, timestamp);
                contacts.insert(label.to_string(), contact);
                UpsertOutcome::Created
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<Contact> {
        self.contacts.read().get(label).cloned()
    }

    /// Point-in-time copy of every contact, most recently updated first.
    pub fn list(&self) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.contacts.read().values().cloned().collect();
        all.sort_by(|a, b| b.last_update.total_cmp(&a.last_update));
        all
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.read().is_empty()
    }

    /// Remove contacts whose age strictly exceeds `max_age` seconds.
    /// Returns the number removed.
    pub fn purge(&self, max_age: f64) -> usize {
        self.purge_at(max_age, now())
    }

    pub fn purge_at(&self, max_age: f64, now: f64) -> usize {
        let mut contacts = self.contacts.write();
        let stale: Vec<String> = contacts
            .values()
            .filter(|c| c.age(now) > max_age)
            .map(|c| c.label.clone())
            .collect();
        if stale.is_empty() {
            return 0;
        }

        let mut tracks = self.tracks.write();
        for label in &stale {
            contacts.remove(label);
            tracks.remove(label);
        }
        stale.len()
    }

    /// Append the current location of every moved contact to its track.
    /// Returns the number of points recorded.
    pub fn sample_tracks(&self) -> usize {
        self.sample_tracks_at(now())
    }

    pub fn sample_tracks_at(&self, timestamp: f64) -> usize {
        let contacts = self.contacts.read();
        let mut tracks = self.tracks.write();
        let mut recorded = 0;

        for contact in contacts.values() {
            let Some((lat, lon)) = contact.position() else {
                continue;
            };
            let moved = tracks
                .get(&contact.label)
                .and_then(|t| t.last())
                .map_or(true, |p| p.lat != lat || p.lon != lon);
            if !moved {
                continue;
            }
            tracks
                .entry(contact.label.clone())
                .or_insert_with(|| Track::new(&contact.label, self.track_capacity))
                .push(TrackPoint {
                    lat,
                    lon,
                    timestamp,
                });
            recorded += 1;
        }
        recorded
    }

    pub fn track(&self, label: &str) -> Option<Track> {
        self.tracks.read().get(label).cloned()
    }

    pub fn tracks(&self) -> Vec<Track> {
        let mut all: Vec<Track> = self.tracks.read().values().cloned().collect();
        all.sort_by(|a, b| a.label.cmp(&b.label));
        all
    }

    /// Persist the current snapshot. Returns the number of contacts written.
    pub fn save_cache(&self, store: &dyn CacheStore) -> Result<usize> {
        let snapshot = self.list();
        store.save(&snapshot)?;
        Ok(snapshot.len())
    }

    /// Restore a snapshot from the store. Returns the number of contacts
    /// taken from it.
    pub fn load_cache(&self, store: &dyn CacheStore) -> Result<usize> {
        let loaded = store.load()?;
        Ok(self.restore(loaded))
    }

    /// Merge restored contacts; for a label present on both sides the copy
    /// with the newer `last_update` wins.
    pub fn restore(&self, restored: Vec<Contact>) -> usize {
        let mut contacts = self.contacts.write();
        let mut taken = 0;
        for contact in restored {
            let newer = contacts
                .get(&contact.label)
                .map_or(true, |existing| contact.last_update > existing.last_update);
            if newer {
                contacts.insert(contact.label.clone(), contact);
                taken += 1;
            }
        }
        taken
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
