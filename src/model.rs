use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC), the only time type inside the engine.
pub type Ms = i64;

/// Whole currency units. Every price in the catalog is an integer.
pub type Money = i64;

pub type StatusId = u32;

/// Status assigned to a reservation when the request does not name one.
pub const DEFAULT_STATUS_ID: StatusId = 1;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

/// A bookable bathhouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub id: Ulid,
    pub name: String,
    /// Price per hour of use.
    pub base_rate: Money,
    /// Guests included in the base rate.
    pub base_guests: u32,
    /// Surcharge for every guest above `base_guests`.
    pub extra_guest_price: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddOnKind {
    Broom,
    MenuItem,
    Massage,
}

impl AddOnKind {
    pub const ALL: [AddOnKind; 3] = [AddOnKind::Broom, AddOnKind::MenuItem, AddOnKind::Massage];

    pub fn label(&self) -> &'static str {
        match self {
            AddOnKind::Broom => "broom",
            AddOnKind::MenuItem => "menu item",
            AddOnKind::Massage => "massage",
        }
    }
}

/// A priced add-on: a broom, a dish from the menu or a massage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Ulid,
    pub name: String,
    pub unit_price: Money,
    /// Menu section, e.g. "drinks". Brooms and massages leave it unset.
    #[serde(default)]
    pub category: Option<String>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: Ulid,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(item_id: Ulid, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// The three line-item sets owned by a reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOns {
    pub brooms: Vec<LineItem>,
    pub menu_items: Vec<LineItem>,
    pub massages: Vec<LineItem>,
}

impl AddOns {
    pub fn of(&self, kind: AddOnKind) -> &[LineItem] {
        match kind {
            AddOnKind::Broom => &self.brooms,
            AddOnKind::MenuItem => &self.menu_items,
            AddOnKind::Massage => &self.massages,
        }
    }

    pub fn set(&mut self, kind: AddOnKind, items: Vec<LineItem>) {
        match kind {
            AddOnKind::Broom => self.brooms = items,
            AddOnKind::MenuItem => self.menu_items = items,
            AddOnKind::Massage => self.massages = items,
        }
    }

    pub fn ids(&self, kind: AddOnKind) -> Vec<Ulid> {
        self.of(kind).iter().map(|li| li.item_id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

/// A stored reservation together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub span: Span,
    pub client: ClientContact,
    pub guests: u32,
    /// Frozen at the time of the last create/update.
    pub total_cost: Money,
    pub status_id: StatusId,
    pub add_ons: AddOns,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// All reservations of one facility, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub facility_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl Timeline {
    pub fn new(facility_id: Ulid) -> Self {
        Self {
            facility_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Reservations whose start lies in the closed window `[from, to]`.
    pub fn starting_within(&self, from: Ms, to: Ms) -> impl Iterator<Item = &Reservation> {
        let left = self.reservations.partition_point(|r| r.span.start < from);
        let right = self.reservations.partition_point(|r| r.span.start <= to);
        self.reservations[left..right.max(left)].iter()
    }
}

/// WAL record format. One record is one atomic change to one reservation
/// aggregate, line items included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationReplaced {
        previous_facility_id: Ulid,
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        facility_id: Ulid,
    },
}

impl Event {
    /// Facilities whose timelines this event touches.
    pub fn facilities(&self) -> Vec<Ulid> {
        match self {
            Event::ReservationCreated { reservation } => vec![reservation.facility_id],
            Event::ReservationReplaced {
                previous_facility_id,
                reservation,
            } => {
                if *previous_facility_id == reservation.facility_id {
                    vec![reservation.facility_id]
                } else {
                    vec![*previous_facility_id, reservation.facility_id]
                }
            }
            Event::ReservationDeleted { facility_id, .. } => vec![*facility_id],
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────

/// A request to book a facility. Instants are ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub facility_id: Ulid,
    pub start: String,
    pub end: String,
    pub client: ClientContact,
    pub guests: u32,
    pub status_id: StatusId,
    pub add_ons: AddOns,
}

impl NewReservation {
    pub fn new(
        facility_id: Ulid,
        start: impl Into<String>,
        end: impl Into<String>,
        client_name: impl Into<String>,
        client_phone: impl Into<String>,
    ) -> Self {
        Self {
            facility_id,
            start: start.into(),
            end: end.into(),
            client: ClientContact {
                name: client_name.into(),
                phone: client_phone.into(),
                email: None,
                notes: None,
            },
            guests: 1,
            status_id: DEFAULT_STATUS_ID,
            add_ons: AddOns::default(),
        }
    }
}

/// Partial update. `None` keeps the stored value; an add-on list that is
/// `Some` (even empty) replaces the stored set for that category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatch {
    pub facility_id: Option<Ulid>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub client_email: Option<String>,
    pub notes: Option<String>,
    pub guests: Option<u32>,
    pub status_id: Option<StatusId>,
    pub brooms: Option<Vec<LineItem>>,
    pub menu_items: Option<Vec<LineItem>>,
    pub massages: Option<Vec<LineItem>>,
}

impl ReservationPatch {
    pub fn add_ons(&self, kind: AddOnKind) -> Option<&Vec<LineItem>> {
        match kind {
            AddOnKind::Broom => self.brooms.as_ref(),
            AddOnKind::MenuItem => self.menu_items.as_ref(),
            AddOnKind::Massage => self.massages.as_ref(),
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A line item expanded with the catalog's current name and price.
/// Catalog fields are `None` when the item has since left the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItemView {
    pub item_id: Ulid,
    pub name: Option<String>,
    pub unit_price: Option<Money>,
    pub category: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: Ulid,
    pub facility_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub client_name: String,
    pub client_phone: String,
    pub client_email: Option<String>,
    pub notes: Option<String>,
    pub guests: u32,
    pub total_cost: Money,
    pub status_id: StatusId,
    pub status: Option<String>,
    pub brooms: Vec<LineItemView>,
    pub menu_items: Vec<LineItemView>,
    pub massages: Vec<LineItemView>,
    pub created_at: Ms,
    pub updated_at: Ms,
}
