use crate::model::Ms;

/// 1970-01-01. Slots before the epoch are rejected outright.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single viewing or service slot may not exceed one week.
pub const MAX_SLOT_DURATION_MS: Ms = 7 * 24 * 3_600_000;

pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_PAYMENT_FIELD_LEN: usize = 256;

/// Active holds per provider ledger.
pub const MAX_ACTIVE_HOLDS_PER_PROVIDER: usize = 10_000;

/// Longest accepted wire frame, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
