use crate::record::DetectionRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of trailing records reported by [`HistoryStore::statistics`].
pub const RECENT_LIMIT: usize = 10;

/// A named statistics bucket matched by case-insensitive substring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryCategory {
    pub name: String,
    pub keyword: String,
}

impl HistoryCategory {
    pub fn new(name: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyword: keyword.into(),
        }
    }

    fn matches(&self, class_name_lower: &str) -> bool {
        class_name_lower.contains(&self.keyword)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub per_category: BTreeMap<String, usize>,
    pub recent: Vec<DetectionRecord>,
}

/// Append-only detection log shared by all requests.
///
/// Guarded by its own mutex, independent from the backend slot.
pub struct HistoryStore {
    records: Mutex<Vec<DetectionRecord>>,
    categories: Vec<HistoryCategory>,
}

impl HistoryStore {
    pub fn new(categories: Vec<HistoryCategory>) -> Self {
        let categories = categories
            .into_iter()
            .map(|c| HistoryCategory {
                name: c.name,
                keyword: c.keyword.to_lowercase(),
            })
            .collect();

        Self {
            records: Mutex::new(Vec::new()),
            categories,
        }
    }

    /// Append all records of one request as a single unit.
    pub fn append(&self, records: &[DetectionRecord]) {
        if records.is_empty() {
            return;
        }
        self.lock().extend_from_slice(records);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Totals, per-category counts, and the recent tail from one consistent snapshot.
    pub fn statistics(&self) -> HistoryStatistics {
        let records = self.lock();

        let mut per_category: BTreeMap<String, usize> = self
            .categories
            .iter()
            .map(|c| (c.name.clone(), 0))
            .collect();

        for record in records.iter() {
            let class_name = record.class_name().to_lowercase();
            for category in &self.categories {
                if category.matches(&class_name) {
                    *per_category.entry(category.name.clone()).or_default() += 1;
                }
            }
        }

        let tail = records.len().saturating_sub(RECENT_LIMIT);

        HistoryStatistics {
            total: records.len(),
            per_category,
            recent: records[tail..].to_vec(),
        }
    }

    // Appends are all-or-nothing, so a poisoned log is still consistent.
    fn lock(&self) -> MutexGuard<'_, Vec<DetectionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
