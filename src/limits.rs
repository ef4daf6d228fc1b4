use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;

/// Mandatory gap after a reservation ends before the facility can be used again.
pub const CLEANING_BUFFER_MS: Ms = 30 * MINUTE_MS;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
pub const MAX_RESERVATION_DURATION_MS: Ms = 7 * 24 * HOUR_MS;

pub const MAX_CLIENT_NAME_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_NOTES_LEN: usize = 2000;

pub const MAX_LINE_ITEMS_PER_KIND: usize = 64;
pub const MAX_QUANTITY: u32 = 1000;
pub const MAX_GUESTS: u32 = 1000;

/// How many times a writer re-resolves a reservation that moved between
/// facilities while it was waiting for the lock.
pub const MAX_RESOLVE_ATTEMPTS: usize = 3;
