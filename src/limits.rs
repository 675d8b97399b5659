use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

// ── Text ─────────────────────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_LOCATION_LEN: usize = 256;
pub const MAX_AMENITIES: usize = 32;
pub const MAX_AMENITY_LEN: usize = 64;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_ACTOR_ID_LEN: usize = 128;

// ── Time ─────────────────────────────────────────────────────────

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single event may not occupy a hall for more than 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

// ── Counts ───────────────────────────────────────────────────────

pub const MAX_HALLS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_HALL: usize = 100_000;
pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Wire ─────────────────────────────────────────────────────────

pub const MAX_FRAME_LEN: usize = 1024 * 1024;
