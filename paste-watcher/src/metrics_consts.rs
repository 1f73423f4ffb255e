pub const CYCLE_STARTS: &str = "paste_watcher_cycle_starts";
pub const CYCLE_SKIPPED: &str = "paste_watcher_cycles_skipped";
pub const CYCLE_ENDS: &str = "paste_watcher_cycle_ends";
pub const CYCLE_DURATION: &str = "paste_watcher_cycle_duration_seconds";

pub const ITEMS_FETCHED: &str = "paste_watcher_items_fetched";
pub const ITEMS_PROCESSED: &str = "paste_watcher_items_processed";
pub const ITEMS_DUPLICATE: &str = "paste_watcher_items_duplicate";
pub const ITEMS_FAILED: &str = "paste_watcher_items_failed";

// Dedup cache housekeeping
pub const CACHE_EVICTED: &str = "paste_watcher_cache_evicted";
pub const CACHE_SIZE: &str = "paste_watcher_cache_size";

pub const HTTP_REQUESTS: &str = "paste_watcher_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "paste_watcher_http_request_duration_seconds";
