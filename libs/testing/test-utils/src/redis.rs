use redis::aio::ConnectionManager;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

const IMAGE_TAG: &str = "8-alpine";

/// Throwaway Redis for integration tests. The container lives as long as
/// this value; dropping it tears the container down.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    connection: ConnectionManager,
}

impl TestRedis {
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag(IMAGE_TAG)
            .start()
            .await
            .expect("start redis container");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("redis host port");

        let client = redis::Client::open(format!("redis://127.0.0.1:{}", port))
            .expect("redis client");
        let connection = ConnectionManager::new(client)
            .await
            .expect("connect to redis container");

        tracing::info!(port, tag = IMAGE_TAG, "Test Redis ready");
        Self {
            _container: container,
            connection,
        }
    }

    /// Shared multiplexed connection, the type stores and workers take.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Keys matching `pattern`, sorted. Handy for asserting what a store wrote.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut conn = self.connection();
        let mut keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .expect("KEYS");
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_keys_sees_writes() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();

        conn.set::<_, _, ()>("bundle:b", "{}").await.unwrap();
        conn.set_ex::<_, _, ()>("bundle:a", "{}", 60).await.unwrap();
        conn.set::<_, _, ()>("other", "1").await.unwrap();

        assert_eq!(redis.keys("bundle:*").await, vec!["bundle:a", "bundle:b"]);
    }
}
