//! Request security: rate limiting, idempotency, signatures

pub mod idempotency;
pub mod ratelimit;

pub use idempotency::{
    generate_request_id, sign_payload, verify_signature, IdempotencyCache, IdempotencyEntry,
};
pub use ratelimit::{RateLimitConfig, RateLimitInfo, RateLimiter};
