/// Longest stay, in nights.
pub const MAX_STAY_DAYS: i64 = 3;

/// How far ahead a stay may start, in calendar months.
pub const BOOKING_HORIZON_MONTHS: u32 = 1;

/// Widest availability query, in days.
pub const MAX_AVAILABILITY_WINDOW_DAYS: i64 = 366;

pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_FULL_NAME_LEN: usize = 256;

/// Longest protocol line accepted by the server, in bytes.
pub const MAX_LINE_LEN: usize = 4096;
