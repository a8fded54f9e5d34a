use time::OffsetDateTime;

pub fn utc_now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn utc_now_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

/// Sentinel for "never happened" timestamps, e.g. a node that has not yet
/// been chosen by placement.
pub fn epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}
