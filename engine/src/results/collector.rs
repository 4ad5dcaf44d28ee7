//! Concurrent sink for completed request records

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::error;

use super::outcome::RequestRecord;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Outcome for request {0} was already recorded")]
    Duplicate(u64),
}

/// Records keyed by request id.
///
/// Workers insert concurrently without a global lock. Each id may be recorded
/// once; a second insert is a programming error and is rejected.
#[derive(Debug, Default)]
pub struct ResultCollector {
    records: DashMap<u64, RequestRecord>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DashMap::with_capacity(capacity),
        }
    }

    pub fn record(&self, record: RequestRecord) -> Result<(), CollectorError> {
        match self.records.entry(record.id) {
            Entry::Occupied(entry) => {
                error!("Duplicate outcome for request {}", entry.key());
                Err(CollectorError::Duplicate(*entry.key()))
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove every record, ordered by id
    pub fn drain(&self) -> Vec<RequestRecord> {
        let ids: Vec<u64> = self.records.iter().map(|entry| *entry.key()).collect();
        let mut records: Vec<RequestRecord> = ids
            .into_iter()
            .filter_map(|id| self.records.remove(&id).map(|(_, record)| record))
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }
}
