use redis::aio::MultiplexedConnection;

use crate::error::{Error, ErrorDetails};

/// Shared handle to the Redis deployment backing the durable usage store and
/// the billing mirror.
pub struct RedisClient {
    pub(crate) client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let (client, conn) = Self::init_conn(url).await.map_err(|e| {
            tracing::error!("Failed to connect to Redis: {e}");
            Error::new(ErrorDetails::InternalError {
                message: format!("Redis connection failed: {e}"),
            })
        })?;
        Ok(Self { client, conn })
    }

    async fn init_conn(url: &str) -> Result<(redis::Client, MultiplexedConnection), Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to get Redis connection: {e}"),
                })
            })?;

        Ok((client, conn))
    }

    /// A cheap clone of the multiplexed connection for one operation.
    pub fn get_connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// A dedicated pub/sub connection.
    pub async fn get_pubsub(&self) -> Result<redis::aio::PubSub, redis::RedisError> {
        self.client.get_async_pubsub().await
    }
}
