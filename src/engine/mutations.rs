use std::collections::HashSet;
use std::sync::atomic::Ordering;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_RESOLVE_ATTEMPTS;
use crate::model::*;
use crate::observability;

use super::conflict::find_conflict;
use super::{apply_event, Engine, EngineError, Missing, WalCommand};

/// Unit of work over one or more facility timelines.
///
/// Holds the write locks of its facilities until dropped, so a conflict
/// check and the write that follows it see the same timeline. Every write is
/// a single WAL record, applied in memory only once it is durable.
pub struct TimelineTxn<'a> {
    engine: &'a Engine,
    _gate: OwnedRwLockReadGuard<()>,
    /// Sorted by facility id.
    guards: Vec<OwnedRwLockWriteGuard<Timeline>>,
}

impl Engine {
    /// Lock the timelines of `facility_ids`, in id order so that two
    /// transactions over overlapping sets cannot deadlock.
    pub async fn begin(&self, facility_ids: &[Ulid]) -> Result<TimelineTxn<'_>, EngineError> {
        let mut ids = facility_ids.to_vec();
        ids.sort();
        ids.dedup();

        let deadline = tokio::time::Instant::now() + self.config.lock_timeout;
        let gate = tokio::time::timeout_at(deadline, self.gate.clone().read_owned())
            .await
            .map_err(|_| self.contended("timed out waiting for WAL compaction"))?;

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let guard = tokio::time::timeout_at(deadline, self.timeline(id).write_owned())
                .await
                .map_err(|_| self.contended("timed out waiting for facility lock"))?;
            guards.push(guard);
        }
        Ok(TimelineTxn {
            engine: self,
            _gate: gate,
            guards,
        })
    }

    /// Lock the facility currently holding reservation `id`, plus `also`.
    ///
    /// The reservation may move to another facility while we wait; the
    /// lookup is retried a few times before reporting `Contention`.
    pub async fn begin_for_reservation(
        &self,
        id: Ulid,
        also: Option<Ulid>,
    ) -> Result<TimelineTxn<'_>, EngineError> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let facility_id = self
                .facility_of(&id)
                .ok_or(EngineError::NotFound(Missing::Reservation(id)))?;
            let mut facilities = vec![facility_id];
            facilities.extend(also);
            let txn = self.begin(&facilities).await?;
            if txn.get(id).is_some() {
                return Ok(txn);
            }
            debug!("reservation {id} moved while waiting for facility {facility_id}; retrying");
        }
        Err(self.contended("reservation kept moving between facilities"))
    }

    pub(super) fn contended(&self, msg: &'static str) -> EngineError {
        metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::Contention(msg)
    }

    /// Rewrite the WAL with one record per live reservation.
    ///
    /// Waits for running units of work to finish and blocks new ones until
    /// the rewrite is done.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;

        let mut events = Vec::with_capacity(self.index.len());
        for handle in self.timeline_handles() {
            let tl = handle.read().await;
            events.extend(tl.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Rewrite { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        self.appends_since_compact.store(0, Ordering::Relaxed);
        info!("compacted WAL to {count} reservations");
        Ok(())
    }

    /// Compact once the configured number of appends has accumulated.
    /// Returns whether a compaction ran.
    pub async fn maybe_compact(&self) -> Result<bool, EngineError> {
        let threshold = self.config.compact_threshold;
        if threshold == 0 || self.wal_appends_since_compact() < threshold {
            return Ok(false);
        }
        self.compact_wal().await?;
        Ok(true)
    }

    pub fn wal_appends_since_compact(&self) -> u64 {
        self.appends_since_compact.load(Ordering::Relaxed)
    }
}

impl TimelineTxn<'_> {
    pub fn facilities(&self) -> Vec<Ulid> {
        self.guards.iter().map(|g| g.facility_id).collect()
    }

    pub fn timeline(&self, facility_id: Ulid) -> Option<&Timeline> {
        self.guards
            .iter()
            .find(|g| g.facility_id == facility_id)
            .map(|g| &**g)
    }

    /// A reservation on any of the locked timelines.
    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.guards.iter().find_map(|g| g.get(id))
    }

    /// First reservation on `facility_id` that `span` collides with.
    /// `exclude` is skipped so an update is not checked against itself.
    pub fn find_conflict(
        &self,
        facility_id: Ulid,
        span: &Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        let tl = self
            .timeline(facility_id)
            .ok_or(EngineError::NotFound(Missing::Facility(facility_id)))?;
        let config = &self.engine.config;
        Ok(find_conflict(tl, span, config.buffer_ms, config.buffer_policy, exclude))
    }

    fn ensure_free(&self, reservation: &Reservation) -> Result<(), EngineError> {
        match self.find_conflict(reservation.facility_id, &reservation.span, Some(reservation.id))? {
            Some(other) => Err(EngineError::Conflict(other)),
            None => Ok(()),
        }
    }

    /// Store a new reservation with its line items.
    pub async fn insert(&mut self, reservation: Reservation) -> Result<Ulid, EngineError> {
        if self.engine.index.contains_key(&reservation.id) {
            return Err(EngineError::ValidationFailed(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        self.ensure_free(&reservation)?;
        let id = reservation.id;
        self.persist_and_apply(Event::ReservationCreated { reservation }).await?;
        metrics::gauge!(observability::RESERVATIONS_LIVE).increment(1.0);
        Ok(id)
    }

    /// Replace a stored reservation and its whole line-item set. The
    /// facility may change if both timelines are part of this unit of work.
    pub async fn replace(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        let previous_facility_id = self
            .get(reservation.id)
            .map(|r| r.facility_id)
            .ok_or(EngineError::NotFound(Missing::Reservation(reservation.id)))?;
        self.ensure_free(&reservation)?;
        self.persist_and_apply(Event::ReservationReplaced {
            previous_facility_id,
            reservation,
        })
        .await
    }

    /// Remove a reservation together with its line items.
    pub async fn delete(&mut self, id: Ulid) -> Result<Reservation, EngineError> {
        let existing = self
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Reservation(id)))?;
        self.persist_and_apply(Event::ReservationDeleted {
            id,
            facility_id: existing.facility_id,
        })
        .await?;
        metrics::gauge!(observability::RESERVATIONS_LIVE).decrement(1.0);
        Ok(existing)
    }

    async fn persist_and_apply(&mut self, event: Event) -> Result<(), EngineError> {
        let held: HashSet<Ulid> = self.facilities().into_iter().collect();
        if let Some(missing) = event.facilities().into_iter().find(|f| !held.contains(f)) {
            return Err(EngineError::NotFound(Missing::Facility(missing)));
        }
        self.engine.wal_append(&event).await?;
        self.engine.appends_since_compact.fetch_add(1, Ordering::Relaxed);
        let mut tls: Vec<&mut Timeline> = self.guards.iter_mut().map(|g| &mut **g).collect();
        apply_event(&mut tls, &event, &self.engine.index);
        Ok(())
    }
}
