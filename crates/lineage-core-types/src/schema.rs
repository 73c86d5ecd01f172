//! Structured-log field keys and event names
//!
//! Shared by the logging macros, the service spans and the test capture
//! layer, so a field renamed in one place cannot silently drift elsewhere.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
/// Set on the span wrapping each service call
pub const FIELD_REQUEST_ID: &str = "request_id";

pub const FIELD_ERR_CODE: &str = "err_code";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
/// Legacy mirror write failed or was dropped; the primary operation still succeeded
pub const EVENT_DUAL_WRITE_WARNING: &str = "dual_write_warning";
/// A retention candidate was kept because verification failed right before deletion
pub const EVENT_RETENTION_SKIP: &str = "retention_skip";
