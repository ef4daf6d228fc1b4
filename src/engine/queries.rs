use ulid::Ulid;

use crate::limits::MAX_RESOLVE_ATTEMPTS;
use crate::model::*;

use super::conflict::violations;
use super::{Engine, EngineError, Missing};

/// A pair of reservations that sit too close together on one facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub facility_id: Ulid,
    pub first: Ulid,
    pub second: Ulid,
}

impl Engine {
    pub fn facility_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.index.get(reservation_id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    pub fn facility_count(&self) -> usize {
        self.timelines.len()
    }

    /// Current copy of a reservation. Does not wait for writers on other
    /// facilities.
    ///
    /// A reservation that keeps moving while we wait for read locks is
    /// reported as `Contention`, not as missing.
    pub async fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let missing = || EngineError::NotFound(Missing::Reservation(id));
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let facility_id = self.facility_of(&id).ok_or_else(missing)?;
            let handle = self
                .timelines
                .get(&facility_id)
                .map(|e| e.value().clone())
                .ok_or_else(missing)?;
            let tl = handle.read().await;
            if let Some(r) = tl.get(id) {
                return Ok(r.clone());
            }
            // Moved or deleted while we waited for the read lock.
        }
        Err(self.contended("reservation kept moving between facilities"))
    }

    /// Reservations whose start lies in the closed window `[from, to]`,
    /// ordered by start. Limited to one facility when `facility_id` is set.
    pub async fn list_by_window(
        &self,
        from: Ms,
        to: Ms,
        facility_id: Option<Ulid>,
    ) -> Vec<Reservation> {
        let handles = match facility_id {
            Some(fid) => self
                .timelines
                .get(&fid)
                .map(|e| vec![e.value().clone()])
                .unwrap_or_default(),
            None => self.timeline_handles(),
        };

        let mut found = Vec::new();
        for handle in handles {
            let tl = handle.read().await;
            found.extend(tl.starting_within(from, to).cloned());
        }
        found.sort_by_key(|r| (r.span.start, r.facility_id, r.id));
        found
    }

    /// Check every timeline against the separation rule.
    pub async fn audit(&self) -> Vec<Violation> {
        let config = &self.config;
        let mut found = Vec::new();
        for handle in self.timeline_handles() {
            let tl = handle.read().await;
            found.extend(
                violations(&tl, config.buffer_ms, config.buffer_policy)
                    .into_iter()
                    .map(|(first, second)| Violation {
                        facility_id: tl.facility_id,
                        first,
                        second,
                    }),
            );
        }
        found
    }
}
