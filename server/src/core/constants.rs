// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Tracelake";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tracelake";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "TRACELAKE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "TRACELAKE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRACELAKE_LOG";

/// Environment variable for the per-organization trace quota
pub const ENV_TRACE_QUOTA: &str = "TRACELAKE_TRACE_QUOTA";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5399;

// =============================================================================
// Ingestion Limits
// =============================================================================

/// Hard cap on an OTLP export request body, checked before any parsing
pub const MAX_OTLP_BATCH_SIZE: usize = 10 * 1024 * 1024;

/// Framework body limit for the OTLP routes, slightly above the batch cap
/// so the receiver sees oversized payloads and rejects them itself
pub const OTLP_BODY_LIMIT: usize = MAX_OTLP_BATCH_SIZE + 1024;

/// Bounded capacity of each ingestion queue; a full queue is the
/// backpressure signal (429), never a blocking enqueue
pub const QUEUE_CAPACITY: usize = 10_000;

/// Maximum items a worker drains from its queue per cycle
pub const WORKER_BATCH_MAX: usize = 256;

/// Persistence retry policy per tenant group
pub const PERSIST_RETRY_ATTEMPTS: u32 = 3;
pub const PERSIST_RETRY_BASE_DELAY_MS: u64 = 50;

/// Quota counter key billed per ingested root span
pub const TRACES_COUNTER: &str = "traces";

/// Retry-After value returned with 429 backpressure responses
pub const BACKPRESSURE_RETRY_AFTER_SECS: u64 = 5;

/// Grace period for background workers to drain on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Query Defaults
// =============================================================================

/// Page size when the request carries no limit
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard cap on a single query page
pub const MAX_QUERY_LIMIT: usize = 1_000;

/// Analytics bucket width in seconds when unspecified
pub const DEFAULT_ANALYTICS_INTERVAL_SECS: i64 = 86_400;

/// Analytics/query window reach when no `oldest` bound is given
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
