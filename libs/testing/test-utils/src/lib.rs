//! Shared test utilities
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Redis Testing
//!
//! Add `features = ["redis"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//!
//! #[tokio::test]
//! #[ignore = "requires docker"]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let conn = redis.connection();
//!     // hand `conn` to a producer, consumer or store
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// Tests stay reproducible because every id is derived from a seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (seed is the hash of the name)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_route_unit");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    fn uuid(&self, salt: u64) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let salted = (self.seed ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15)).to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&salted);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Deterministic tenant id
    pub fn tenant_id(&self) -> String {
        format!("tenant-{}", self.uuid(1).simple())
    }

    /// Deterministic message id
    pub fn message_id(&self) -> String {
        format!("1-{}", self.uuid(2).simple())
    }

    /// Generate a unique name for testing
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// let name = builder.name("stream", "route");
    /// assert!(name.starts_with("test-stream-"));
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.tenant_id(), builder2.tenant_id());
        assert_eq!(builder1.message_id(), builder2.message_id());
        assert_eq!(builder1.name("stream", "test"), builder2.name("stream", "test"));
    }

    #[test]
    fn test_ids_differ_by_kind() {
        let builder = TestDataBuilder::from_test_name("my_test");
        assert_ne!(
            builder.tenant_id().trim_start_matches("tenant-"),
            builder.message_id().trim_start_matches("1-")
        );
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.message_id(), builder2.message_id());
    }
}
