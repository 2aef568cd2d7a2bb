//! Set difference between what is stored for a stock and what the latest
//! scrape found.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_delete: BTreeSet<DateTime<Utc>>,
    pub to_insert: BTreeSet<DateTime<Utc>>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_insert.is_empty()
    }
}

/// `to_delete = persisted \ discovered`, `to_insert = discovered \ persisted`.
///
/// An empty `discovered` set deletes everything persisted. Callers that treat
/// "nothing extracted" as a scrape failure must stop before getting here.
pub fn reconcile(
    persisted: &BTreeSet<DateTime<Utc>>,
    discovered: &BTreeSet<DateTime<Utc>>,
) -> Delta {
    Delta {
        to_delete: persisted.difference(discovered).copied().collect(),
        to_insert: discovered.difference(persisted).copied().collect(),
    }
}
