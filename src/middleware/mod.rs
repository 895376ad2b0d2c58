pub mod rate_limiting;

pub use rate_limiting::{
    Clock, ManualClock, RateLimitDecision, RateLimitMiddleware, RateLimitStore, SystemClock,
    enforce_rate_limit, start_memory_store_cleanup_task,
};
