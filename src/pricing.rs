//! Reservation pricing.
//!
//! `total = floor(base_rate * hours) + extra guests * surcharge + Σ add-ons`.
//! Only the base cost is ever truncated; everything else is integer math.

use std::collections::HashMap;

use serde::Serialize;
use ulid::Ulid;

use crate::catalog::CatalogStore;
use crate::engine::{EngineError, Missing};
use crate::model::*;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Cost breakdown of one reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub base: Money,
    pub extra_guests: Money,
    pub brooms: Money,
    pub menu_items: Money,
    pub massages: Money,
    pub total: Money,
}

/// Catalog entries referenced by a reservation, one map per category.
#[derive(Debug, Clone, Default)]
pub struct PriceLists {
    pub brooms: HashMap<Ulid, CatalogItem>,
    pub menu_items: HashMap<Ulid, CatalogItem>,
    pub massages: HashMap<Ulid, CatalogItem>,
}

impl PriceLists {
    /// One batched catalog lookup per category.
    pub fn fetch(catalog: &dyn CatalogStore, add_ons: &AddOns) -> Self {
        let mut lists = PriceLists::default();
        for kind in AddOnKind::ALL {
            let ids = add_ons.ids(kind);
            if !ids.is_empty() {
                *lists.of_mut(kind) = catalog.add_ons(kind, &ids);
            }
        }
        lists
    }

    pub fn of(&self, kind: AddOnKind) -> &HashMap<Ulid, CatalogItem> {
        match kind {
            AddOnKind::Broom => &self.brooms,
            AddOnKind::MenuItem => &self.menu_items,
            AddOnKind::Massage => &self.massages,
        }
    }

    fn of_mut(&mut self, kind: AddOnKind) -> &mut HashMap<Ulid, CatalogItem> {
        match kind {
            AddOnKind::Broom => &mut self.brooms,
            AddOnKind::MenuItem => &mut self.menu_items,
            AddOnKind::Massage => &mut self.massages,
        }
    }
}

fn overflow() -> EngineError {
    EngineError::LimitExceeded("cost overflow")
}

/// Hourly rate times fractional hours, truncated toward zero.
pub fn base_cost(facility: &Facility, span: &Span) -> Result<Money, EngineError> {
    let hours = span.duration_ms() as f64 / MS_PER_HOUR;
    let cost = facility.base_rate as f64 * hours;
    // `as` saturates; a cost outside the Money range must not be stored.
    if !cost.is_finite() || cost < Money::MIN as f64 || cost >= Money::MAX as f64 {
        return Err(overflow());
    }
    Ok(cost as Money)
}

pub fn extra_guest_cost(facility: &Facility, guests: u32) -> Result<Money, EngineError> {
    let extra = guests.saturating_sub(facility.base_guests) as Money;
    extra.checked_mul(facility.extra_guest_price).ok_or_else(overflow)
}

/// Sum of `unit_price * quantity` for one category. Every id must be in
/// `prices`.
pub fn add_on_cost(
    kind: AddOnKind,
    items: &[LineItem],
    prices: &HashMap<Ulid, CatalogItem>,
) -> Result<Money, EngineError> {
    items.iter().try_fold(0 as Money, |acc, li| {
        let item = prices
            .get(&li.item_id)
            .ok_or(EngineError::NotFound(Missing::AddOn(kind, li.item_id)))?;
        item.unit_price
            .checked_mul(li.quantity as Money)
            .and_then(|cost| acc.checked_add(cost))
            .ok_or_else(overflow)
    })
}

/// Price a reservation. Fails without a partial result if any add-on is
/// missing from `prices`.
pub fn price(
    facility: &Facility,
    span: &Span,
    guests: u32,
    add_ons: &AddOns,
    prices: &PriceLists,
) -> Result<Quote, EngineError> {
    let base = base_cost(facility, span)?;
    let extra_guests = extra_guest_cost(facility, guests)?;
    let brooms = add_on_cost(AddOnKind::Broom, &add_ons.brooms, prices.of(AddOnKind::Broom))?;
    let menu_items =
        add_on_cost(AddOnKind::MenuItem, &add_ons.menu_items, prices.of(AddOnKind::MenuItem))?;
    let massages =
        add_on_cost(AddOnKind::Massage, &add_ons.massages, prices.of(AddOnKind::Massage))?;

    let total = [extra_guests, brooms, menu_items, massages]
        .into_iter()
        .try_fold(base, |acc, part| acc.checked_add(part))
        .ok_or_else(overflow)?;

    Ok(Quote {
        base,
        extra_guests,
        brooms,
        menu_items,
        massages,
        total,
    })
}
