use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;
use crate::status::{StatusRow, StatusTable};

/// Read-only view of facilities and add-ons.
pub trait CatalogStore: Send + Sync {
    fn facility(&self, id: Ulid) -> Option<Facility>;

    /// Entries for `ids` of one category. Unknown ids are simply absent.
    fn add_ons(&self, kind: AddOnKind, ids: &[Ulid]) -> HashMap<Ulid, CatalogItem>;
}

/// Contents of a catalog seed file (JSON). Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    pub facilities: Vec<Facility>,
    pub brooms: Vec<CatalogItem>,
    pub menu_items: Vec<CatalogItem>,
    pub massages: Vec<CatalogItem>,
    pub statuses: Vec<StatusRow>,
}

impl CatalogSeed {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn items(&self, kind: AddOnKind) -> &[CatalogItem] {
        match kind {
            AddOnKind::Broom => &self.brooms,
            AddOnKind::MenuItem => &self.menu_items,
            AddOnKind::Massage => &self.massages,
        }
    }

    /// The seed's status rows, or the default table when it has none.
    pub fn status_table(&self) -> StatusTable {
        if self.statuses.is_empty() {
            StatusTable::default()
        } else {
            StatusTable::from_rows(&self.statuses)
        }
    }
}

/// Catalog held in concurrent maps. Admin tooling may update it while the
/// engine runs; readers always see the current entry.
#[derive(Default)]
pub struct InMemoryCatalog {
    facilities: DashMap<Ulid, Facility>,
    items: DashMap<(AddOnKind, Ulid), CatalogItem>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let catalog = Self::new();
        for f in &seed.facilities {
            catalog.upsert_facility(f.clone());
        }
        for kind in AddOnKind::ALL {
            for item in seed.items(kind) {
                catalog.upsert_item(kind, item.clone());
            }
        }
        catalog
    }

    pub fn upsert_facility(&self, facility: Facility) {
        self.facilities.insert(facility.id, facility);
    }

    pub fn remove_facility(&self, id: &Ulid) -> Option<Facility> {
        self.facilities.remove(id).map(|(_, f)| f)
    }

    pub fn upsert_item(&self, kind: AddOnKind, item: CatalogItem) {
        self.items.insert((kind, item.id), item);
    }

    pub fn remove_item(&self, kind: AddOnKind, id: &Ulid) -> Option<CatalogItem> {
        self.items.remove(&(kind, *id)).map(|(_, item)| item)
    }

    pub fn facility_count(&self) -> usize {
        self.facilities.len()
    }

    pub fn item_count(&self, kind: AddOnKind) -> usize {
        self.items.iter().filter(|e| e.key().0 == kind).count()
    }
}

impl CatalogStore for InMemoryCatalog {
    fn facility(&self, id: Ulid) -> Option<Facility> {
        self.facilities.get(&id).map(|e| e.value().clone())
    }

    fn add_ons(&self, kind: AddOnKind, ids: &[Ulid]) -> HashMap<Ulid, CatalogItem> {
        ids.iter()
            .filter_map(|id| self.items.get(&(kind, *id)).map(|e| (*id, e.value().clone())))
            .collect()
    }
}
