/// Count of store operations, labelled by `op` and `outcome`
pub const STORE_OPERATIONS_COUNTER: &str = "kv_store_operations_total";

/// Time spent in a store operation, labelled by `op`
pub const STORE_OPERATION_DURATION_HISTOGRAM: &str = "kv_store_operation_duration_seconds";

/// Size in bytes of encoded values written by `put`
pub const STORE_VALUE_BYTES_HISTOGRAM: &str = "kv_store_value_bytes";
