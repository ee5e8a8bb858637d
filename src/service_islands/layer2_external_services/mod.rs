//! Layer 2: External Services
//!
//! Everything that leaves the process: the Redis store binding, model
//! provider HTTP transport with per-endpoint circuit breakers, and the
//! embedding capability consumed from external providers.

pub mod embedding_island;
pub mod model_provider_island;
pub mod redis_store_island;

// Re-export the main island components for easy access
pub use embedding_island::Embedder;
pub use model_provider_island::circuit_breaker::{CircuitBreaker, CircuitState};
pub use model_provider_island::{HttpProviderClient, ModelInvoker};
pub use redis_store_island::{RedisConnectionFactory, RedisStore};
