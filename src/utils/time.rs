use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// return millisecond since unix epoch
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
