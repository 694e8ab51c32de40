//! Integration tests for rate limiting functionality.

#[path = "rate_limiting/memory.rs"]
mod memory;
#[path = "rate_limiting/redis.rs"]
mod redis;
