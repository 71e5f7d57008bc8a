//! Tiered, multi-window rate limiting.

mod decision;
mod limits;
mod rate_limiter;

pub use decision::{Decision, RateLimitError, WindowStatus};
pub use limits::{FailurePolicies, FailurePolicy, Limit, Remaining, TierLimits, TierTable};
pub use rate_limiter::RateLimiter;
