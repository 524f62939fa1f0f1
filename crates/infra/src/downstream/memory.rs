//! In-memory record target for development and tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use bulkpatch_core::{FieldMap, Operation};

use super::{DownstreamError, RecordUpdater};

/// Applies updates to a map of records.
///
/// Failures can be scripted per target: each call pops the next scripted
/// error; once the script is empty the call succeeds.
#[derive(Debug, Default)]
pub struct InMemoryRecordTarget {
    records: Mutex<BTreeMap<String, FieldMap>>,
    scripted: Mutex<HashMap<String, VecDeque<DownstreamError>>>,
    calls: AtomicUsize,
}

impl InMemoryRecordTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue failures for `target_id`, returned in order by subsequent calls.
    pub fn script_failures(
        &self,
        target_id: impl Into<String>,
        errors: impl IntoIterator<Item = DownstreamError>,
    ) {
        let mut scripted = self.scripted.lock().unwrap_or_else(|p| p.into_inner());
        scripted.entry(target_id.into()).or_default().extend(errors);
    }

    /// Total calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn record(&self, target_id: &str) -> Option<FieldMap> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.get(target_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl RecordUpdater for InMemoryRecordTarget {
    async fn apply(&self, operation: &Operation) -> Result<(), DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let scripted = {
            let mut scripted = self.scripted.lock().unwrap_or_else(|p| p.into_inner());
            scripted
                .get_mut(&operation.target_id)
                .and_then(VecDeque::pop_front)
        };
        if let Some(err) = scripted {
            return Err(err);
        }

        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let record = records.entry(operation.target_id.clone()).or_default();
        for (name, value) in &operation.fields {
            record.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}
