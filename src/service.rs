//! Reservation lifecycle: create, update, delete, get and list.
//!
//! Every write runs `validate → lock → conflict check → price → persist`
//! inside one [`TimelineTxn`], so a request either lands completely (the
//! reservation and all of its line items in one WAL record) or not at all.
//! Reads assemble views against the live catalog; only `total_cost` is
//! frozen at booking time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::catalog::CatalogStore;
use crate::engine::{now_ms, validate_span, Engine, EngineError, Missing, TimelineTxn};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::{price, PriceLists};
use crate::status::StatusRegistry;
use crate::time::{day_window, format_instant, parse_instant};

#[derive(Clone)]
pub struct ReservationService {
    engine: Arc<Engine>,
    catalog: Arc<dyn CatalogStore>,
    statuses: Arc<dyn StatusRegistry>,
}

impl ReservationService {
    pub fn new(
        engine: Arc<Engine>,
        catalog: Arc<dyn CatalogStore>,
        statuses: Arc<dyn StatusRegistry>,
    ) -> Self {
        Self {
            engine,
            catalog,
            statuses,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn create(&self, request: NewReservation) -> Result<ReservationView, EngineError> {
        let started = Instant::now();
        let result = self.create_inner(request).await;
        finish("create", &result, started);
        result
    }

    pub async fn update(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<ReservationView, EngineError> {
        let started = Instant::now();
        let result = self.update_inner(id, patch).await;
        finish("update", &result, started);
        result
    }

    /// Remove a reservation and all of its line items.
    pub async fn delete(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        finish("delete", &result, started);
        result
    }

    pub async fn get(&self, id: Ulid) -> Result<ReservationView, EngineError> {
        let started = Instant::now();
        let result = self.engine.get(id).await.map(|r| self.assemble(&r));
        finish("get", &result, started);
        result
    }

    /// Reservations starting on the UTC day named by `date` (a bare date or a
    /// timestamp whose date part is used), ordered by start.
    pub async fn list(
        &self,
        date: &str,
        facility_id: Option<Ulid>,
    ) -> Result<Vec<ReservationView>, EngineError> {
        let started = Instant::now();
        let result = match day_window(date) {
            Ok((from, to)) => {
                let found = self.engine.list_by_window(from, to, facility_id).await;
                Ok(self.assemble_many(&found))
            }
            Err(e) => Err(e),
        };
        finish("list", &result, started);
        result
    }

    // ── Writes ──────────────────────────────────────────────

    async fn create_inner(&self, req: NewReservation) -> Result<ReservationView, EngineError> {
        let facility = self.facility(req.facility_id)?;
        self.ensure_status(req.status_id)?;
        let span = validate_span(parse_instant(&req.start)?, parse_instant(&req.end)?)?;
        validate_client(&req.client)?;
        validate_guests(req.guests)?;
        for kind in AddOnKind::ALL {
            validate_line_items(kind, req.add_ons.of(kind))?;
        }
        debug!(
            "create validated: facility {} {}..{}",
            facility.id,
            format_instant(span.start),
            format_instant(span.end)
        );

        let mut txn = self.engine.begin(&[facility.id]).await?;
        if let Some(other) = txn.find_conflict(facility.id, &span, None)? {
            return Err(EngineError::Conflict(other));
        }
        let prices = PriceLists::fetch(self.catalog.as_ref(), &req.add_ons);
        let quote = price(&facility, &span, req.guests, &req.add_ons, &prices)?;
        debug!("create priced: {quote:?}");

        let now = now_ms();
        let reservation = Reservation {
            id: Ulid::new(),
            facility_id: facility.id,
            span,
            client: normalize_client(req.client),
            guests: req.guests,
            total_cost: quote.total,
            status_id: req.status_id,
            add_ons: req.add_ons,
            created_at: now,
            updated_at: now,
        };
        txn.insert(reservation.clone()).await?;
        drop(txn);

        info!(
            "reservation {} created on {} ({}), total {}",
            reservation.id,
            facility.name,
            format_instant(reservation.span.start),
            reservation.total_cost
        );
        self.compact_if_due().await;
        Ok(self.assemble(&reservation))
    }

    async fn update_inner(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<ReservationView, EngineError> {
        if let Some(facility_id) = patch.facility_id {
            self.facility(facility_id)?;
        }
        if let Some(status_id) = patch.status_id {
            self.ensure_status(status_id)?;
        }
        let start = patch.start.as_deref().map(parse_instant).transpose()?;
        let end = patch.end.as_deref().map(parse_instant).transpose()?;
        if let Some(guests) = patch.guests {
            validate_guests(guests)?;
        }
        for kind in AddOnKind::ALL {
            if let Some(items) = patch.add_ons(kind) {
                validate_line_items(kind, items)?;
            }
        }

        let mut txn = self.engine.begin_for_reservation(id, patch.facility_id).await?;
        let current = txn
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Reservation(id)))?;
        let next = self.merge(&txn, &current, patch, start, end)?;
        txn.replace(next.clone()).await?;
        drop(txn);

        if next.facility_id != current.facility_id {
            info!(
                "reservation {id} moved from facility {} to {}",
                current.facility_id, next.facility_id
            );
        }
        info!("reservation {id} updated, total {}", next.total_cost);
        self.compact_if_due().await;
        Ok(self.assemble(&next))
    }

    /// Apply `patch` on top of `current`, re-check the interval and recompute
    /// the total from the resulting state.
    fn merge(
        &self,
        txn: &TimelineTxn<'_>,
        current: &Reservation,
        patch: ReservationPatch,
        start: Option<Ms>,
        end: Option<Ms>,
    ) -> Result<Reservation, EngineError> {
        let mut next = current.clone();
        if let Some(facility_id) = patch.facility_id {
            next.facility_id = facility_id;
        }
        if let Some(status_id) = patch.status_id {
            next.status_id = status_id;
        }
        if let Some(guests) = patch.guests {
            next.guests = guests;
        }
        if let Some(name) = patch.client_name {
            next.client.name = name;
        }
        if let Some(phone) = patch.client_phone {
            next.client.phone = phone;
        }
        if let Some(email) = patch.client_email {
            next.client.email = Some(email);
        }
        if let Some(notes) = patch.notes {
            next.client.notes = Some(notes);
        }
        next.client = normalize_client(next.client);
        validate_client(&next.client)?;

        next.span = validate_span(
            start.unwrap_or(current.span.start),
            end.unwrap_or(current.span.end),
        )?;
        if let Some(other) = txn.find_conflict(next.facility_id, &next.span, Some(current.id))? {
            return Err(EngineError::Conflict(other));
        }

        let patched = [
            (AddOnKind::Broom, patch.brooms),
            (AddOnKind::MenuItem, patch.menu_items),
            (AddOnKind::Massage, patch.massages),
        ];
        for (kind, items) in patched {
            if let Some(items) = items {
                next.add_ons.set(kind, items);
            }
        }

        let facility = self.facility(next.facility_id)?;
        let prices = PriceLists::fetch(self.catalog.as_ref(), &next.add_ons);
        next.total_cost = price(&facility, &next.span, next.guests, &next.add_ons, &prices)?.total;
        next.updated_at = now_ms();
        Ok(next)
    }

    async fn delete_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let mut txn = self.engine.begin_for_reservation(id, None).await?;
        let removed = txn.delete(id).await?;
        drop(txn);
        info!(
            "reservation {id} deleted from facility {} ({} line items)",
            removed.facility_id,
            AddOnKind::ALL
                .iter()
                .map(|k| removed.add_ons.of(*k).len())
                .sum::<usize>()
        );
        self.compact_if_due().await;
        Ok(())
    }

    /// The write has already committed; a failed compaction only means the
    /// log stays longer until the next attempt.
    async fn compact_if_due(&self) {
        if let Err(e) = self.engine.maybe_compact().await {
            warn!("WAL compaction failed: {e}");
        }
    }

    // ── Lookups ─────────────────────────────────────────────

    fn facility(&self, id: Ulid) -> Result<Facility, EngineError> {
        self.catalog
            .facility(id)
            .ok_or(EngineError::NotFound(Missing::Facility(id)))
    }

    fn ensure_status(&self, id: StatusId) -> Result<(), EngineError> {
        if self.statuses.exists(id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(Missing::Status(id)))
        }
    }

    // ── Assembly ────────────────────────────────────────────

    pub fn assemble(&self, reservation: &Reservation) -> ReservationView {
        self.assemble_many(std::slice::from_ref(reservation))
            .pop()
            .unwrap_or_else(|| bare_view(reservation))
    }

    /// Views for `reservations`, with one catalog lookup per category for the
    /// whole batch.
    pub fn assemble_many(&self, reservations: &[Reservation]) -> Vec<ReservationView> {
        let mut catalog: HashMap<AddOnKind, HashMap<Ulid, CatalogItem>> = HashMap::new();
        for kind in AddOnKind::ALL {
            let ids: Vec<Ulid> = reservations
                .iter()
                .flat_map(|r| r.add_ons.of(kind).iter().map(|li| li.item_id))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if !ids.is_empty() {
                catalog.insert(kind, self.catalog.add_ons(kind, &ids));
            }
        }

        let mut status_names: HashMap<StatusId, Option<String>> = HashMap::new();
        reservations
            .iter()
            .map(|r| {
                let mut view = bare_view(r);
                view.status = status_names
                    .entry(r.status_id)
                    .or_insert_with(|| self.statuses.name_of(r.status_id))
                    .clone();
                for kind in AddOnKind::ALL {
                    let found = catalog.get(&kind);
                    let lines = r
                        .add_ons
                        .of(kind)
                        .iter()
                        .map(|li| {
                            let item = found.and_then(|m| m.get(&li.item_id));
                            LineItemView {
                                item_id: li.item_id,
                                name: item.map(|i| i.name.clone()),
                                unit_price: item.map(|i| i.unit_price),
                                category: item.and_then(|i| i.category.clone()),
                                quantity: li.quantity,
                            }
                        })
                        .collect();
                    match kind {
                        AddOnKind::Broom => view.brooms = lines,
                        AddOnKind::MenuItem => view.menu_items = lines,
                        AddOnKind::Massage => view.massages = lines,
                    }
                }
                view
            })
            .collect()
    }
}

fn finish<T>(op: &'static str, result: &Result<T, EngineError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) if e.is_retryable() => {
            warn!("{op} gave up on a busy facility, caller may retry: {e}");
            e.kind()
        }
        Err(e) => {
            debug!("{op} rejected: {e}");
            e.kind()
        }
    };
    observability::record(op, outcome, started);
}

fn bare_view(r: &Reservation) -> ReservationView {
    ReservationView {
        id: r.id,
        facility_id: r.facility_id,
        start: r.span.start,
        end: r.span.end,
        client_name: r.client.name.clone(),
        client_phone: r.client.phone.clone(),
        client_email: r.client.email.clone(),
        notes: r.client.notes.clone(),
        guests: r.guests,
        total_cost: r.total_cost,
        status_id: r.status_id,
        status: None,
        brooms: Vec::new(),
        menu_items: Vec::new(),
        massages: Vec::new(),
        created_at: r.created_at,
        updated_at: r.updated_at,
    }
}

// ── Request validation ──────────────────────────────────────

/// Trim the contact fields; blank optional fields become `None`.
fn normalize_client(client: ClientContact) -> ClientContact {
    let optional = |v: Option<String>| {
        v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    };
    ClientContact {
        name: client.name.trim().to_string(),
        phone: client.phone.trim().to_string(),
        email: optional(client.email),
        notes: optional(client.notes),
    }
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_client(client: &ClientContact) -> Result<(), EngineError> {
    if client.name.trim().is_empty() {
        return Err(EngineError::ValidationFailed("client name is required".into()));
    }
    if client.phone.trim().is_empty() {
        return Err(EngineError::ValidationFailed("client phone is required".into()));
    }
    check_len(&client.name, MAX_CLIENT_NAME_LEN, "client name too long")?;
    check_len(&client.phone, MAX_PHONE_LEN, "client phone too long")?;
    if let Some(email) = &client.email {
        check_len(email, MAX_EMAIL_LEN, "client email too long")?;
    }
    if let Some(notes) = &client.notes {
        check_len(notes, MAX_NOTES_LEN, "notes too long")?;
    }
    Ok(())
}

fn validate_guests(guests: u32) -> Result<(), EngineError> {
    if guests == 0 {
        return Err(EngineError::ValidationFailed("guests must be at least 1".into()));
    }
    if guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    Ok(())
}

fn validate_line_items(kind: AddOnKind, items: &[LineItem]) -> Result<(), EngineError> {
    if items.len() > MAX_LINE_ITEMS_PER_KIND {
        return Err(EngineError::LimitExceeded("too many line items"));
    }
    let mut seen = HashSet::with_capacity(items.len());
    for li in items {
        if li.quantity == 0 {
            return Err(EngineError::ValidationFailed(format!(
                "{} {}: quantity must be at least 1",
                kind.label(),
                li.item_id
            )));
        }
        if li.quantity > MAX_QUANTITY {
            return Err(EngineError::LimitExceeded("line item quantity too large"));
        }
        if !seen.insert(li.item_id) {
            return Err(EngineError::ValidationFailed(format!(
                "{} {} listed more than once",
                kind.label(),
                li.item_id
            )));
        }
    }
    Ok(())
}
