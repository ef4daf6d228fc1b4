use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::StatusId;

/// Lookup of reservation status ids. Reservations store only the id.
pub trait StatusRegistry: Send + Sync {
    fn exists(&self, id: StatusId) -> bool;
    fn name_of(&self, id: StatusId) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub id: StatusId,
    pub name: String,
}

/// Fixed status table, built once at startup.
#[derive(Debug, Clone)]
pub struct StatusTable {
    names: BTreeMap<StatusId, String>,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::from_rows(&[
            StatusRow { id: 1, name: "new".into() },
            StatusRow { id: 2, name: "confirmed".into() },
            StatusRow { id: 3, name: "cancelled".into() },
        ])
    }
}

impl StatusTable {
    /// Later rows win on duplicate ids.
    pub fn from_rows(rows: &[StatusRow]) -> Self {
        Self {
            names: rows.iter().map(|r| (r.id, r.name.clone())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl StatusRegistry for StatusTable {
    fn exists(&self, id: StatusId) -> bool {
        self.names.contains_key(&id)
    }

    fn name_of(&self, id: StatusId) -> Option<String> {
        self.names.get(&id).cloned()
    }
}
