//! Hard input limits. Everything a client can size is bounded here.

/// Max concurrently loaded tenants (réseaux).
pub const MAX_TENANTS: usize = 256;

pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Max centers tracked per tenant engine.
pub const MAX_CENTERS_PER_TENANT: usize = 4096;

/// Max contrôleur entries in one published day schedule.
pub const MAX_STAFF_PER_DAY: usize = 64;

/// Max working windows per contrôleur per day (split shifts).
pub const MAX_WINDOWS_PER_STAFF: usize = 4;

/// Max manual blocks held per center (all dates, recurrences included).
pub const MAX_BLOCKS_PER_CENTER: usize = 4096;

/// Max appointments per center per day.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 512;

pub const MAX_REASON_LEN: usize = 512;

pub const MAX_ACTOR_LEN: usize = 128;

/// Max byte length of the JSON staff payload in a schedule publish.
pub const MAX_SCHEDULE_JSON_LEN: usize = 64 * 1024;

/// Availability responses are truncated to this many slots.
pub const MAX_SLOT_RESULTS: usize = 50;

/// `available_dates` scans at most this many days.
pub const MAX_DATE_RANGE_DAYS: i64 = 60;
