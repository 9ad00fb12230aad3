/**
 * STORE DES RAPPORTS - Dernier rapport connu par appareil
 *
 * RÔLE : Map device_id -> LatestEntry partagée entre les handlers HTTP.
 * Un nouveau rapport remplace l'ancien en entier (pas de fusion de champs).
 * Pas d'éviction ni de persistance : tout disparaît au redémarrage.
 */

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

use crate::models::ReportRecord;

pub type Shared<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

#[derive(Debug, Clone)]
pub struct LatestEntry {
    pub record: ReportRecord,
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale { age_seconds: i64 },
}

/// Stale uniquement si l'âge dépasse strictement `stale_after`.
/// Un âge négatif (horloge reculée) compte comme frais.
pub fn freshness(received_at: OffsetDateTime, now: OffsetDateTime, stale_after: Duration) -> Freshness {
    let age = now - received_at;
    if age > stale_after {
        Freshness::Stale {
            age_seconds: age.whole_seconds(),
        }
    } else {
        Freshness::Fresh
    }
}

#[derive(Clone)]
pub struct ReportStore {
    entries: Shared<HashMap<String, LatestEntry>>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self {
            entries: new_state(HashMap::new()),
        }
    }

    /// Remplace le rapport de `device_id`, horodaté maintenant.
    pub fn upsert(&self, device_id: String, record: ReportRecord) {
        self.upsert_at(device_id, record, OffsetDateTime::now_utc());
    }

    pub fn upsert_at(&self, device_id: String, record: ReportRecord, received_at: OffsetDateTime) {
        self.entries
            .write()
            .insert(device_id, LatestEntry { record, received_at });
    }

    pub fn latest(&self, device_id: &str) -> Option<LatestEntry> {
        self.entries.read().get(device_id).cloned()
    }

    /// Tous les enregistrements, frais ou non.
    pub fn snapshot(&self) -> BTreeMap<String, ReportRecord> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.record.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
