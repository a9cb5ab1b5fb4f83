//! Rate limit store implementations
//!
//! - `memory` - single process, mutex-guarded
//! - `redis` - Lua scripts, or a labeled best-effort fallback
//! - `postgres` - row locks inside a transaction

mod memory;
mod postgres;
mod redis;

pub use memory::InMemoryRateLimitStore;
pub use postgres::PostgresRateLimitStore;
pub use redis::{RedisRateLimitConfig, RedisRateLimitMode, RedisRateLimitStore};
