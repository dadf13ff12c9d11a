use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Discord epoch: 2015-01-01T00:00:00Z
const EPOCH: u64 = 1_420_070_400_000;

/// Milliseconds since the Unix epoch encoded in a snowflake id.
pub fn timestamp_of(id: &str) -> Option<u64> {
    let num: u64 = id.parse().ok()?;
    Some((num >> 22) + EPOCH)
}

/// How long ago the snowflake was minted. `None` when the id does not parse
/// or the clock sits before the id's timestamp.
pub fn age_of(id: &str) -> Option<Duration> {
    let minted = timestamp_of(id)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_millis() as u64;
    now.checked_sub(minted).map(Duration::from_millis)
}
