use std::time::SystemTime;

/// Wall-clock instant as milliseconds since the Unix epoch.
pub type UnixMillis = u64;

pub fn unix_millis() -> UnixMillis {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as UnixMillis
}
