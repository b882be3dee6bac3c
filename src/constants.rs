//! Protocol constants for the cell location lookup service and on-disk formats.

/// Primary lookup endpoint. Named placeholders are filled from the identifier.
pub const PRIMARY_URL_TEMPLATE: &str = "http://api.cellocation.com/cell/?coord=wgs84&output=json&mcc={mcc}&mnc={mnc}&lac={lac}&ci={cid}";

/// Backup endpoint tried once when the primary one throttles us.
/// The trailing `96` is the default signal strength the service expects.
pub const FALLBACK_URL_TEMPLATE: &str =
    "http://api.cellocation.com/loc/?coord=wgs84&output=json&cl={mcc},{mnc},{lac},{cid},96";

pub const DEFAULT_USER_AGENT: &str =
    "mozilla/5.0 (compatible; baiduspider/2.0; +http://www.baidu.com/search/spider.html)";

/// HTTP status (and body errcode) the service uses for "daily quota exceeded".
pub const RATE_LIMITED_STATUS: u16 = 403;

pub const ERRCODE_OK: i64 = 0;
pub const ERRCODE_BAD_PARAMETERS: i64 = 10000;
pub const ERRCODE_NO_DATA: i64 = 10001;

pub const DEFAULT_SLEEP_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MAX_POOL_WORKERS: usize = 32;

pub const DEFAULT_CHECKPOINT_PATH: &str = "spider.cursor";
pub const CHECKPOINT_LOCK_SUFFIX: &str = ".lck";

/// Column order of the input dataset.
pub const SOURCE_FIELDS: [&str; 4] = ["mcc", "mnc", "lac", "cid"];

/// Column order of the output dataset. `key` is only written when key generation is on.
pub const OUTPUT_FIELDS: [&str; 8] = ["mcc", "mnc", "lac", "cid", "lat", "lon", "address", "radius"];
pub const KEY_FIELD: &str = "key";

/// Human readable text for the service's error code table.
#[must_use]
pub fn describe_errcode(code: i64) -> Option<&'static str> {
    match code {
        ERRCODE_BAD_PARAMETERS => Some("bad query parameters"),
        ERRCODE_NO_DATA => Some("no data for this cell"),
        c if c == i64::from(RATE_LIMITED_STATUS) => Some("daily query quota exceeded"),
        _ => None,
    }
}
