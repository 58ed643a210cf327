//! Pooled broker connection.
//!
//! One connection and one channel per process, created lazily. All
//! channel users call [`ConnectionPool::wait_for_connection`] first;
//! establishment happens under an async mutex, so concurrent first
//! callers await the same attempt instead of racing to connect, and a
//! lost connection is replaced on the next call.

use super::QueueError;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

struct Pooled {
    connection: Connection,
    channel: Channel,
}

pub struct ConnectionPool {
    url: String,
    state: Mutex<Option<Pooled>>,
}

impl ConnectionPool {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Mutex::new(None),
        }
    }

    /// The pooled channel, connecting or reconnecting first if needed.
    ///
    /// Await this before every channel operation; it is idempotent and
    /// cheap once connected.
    #[instrument(skip(self))]
    pub async fn wait_for_connection(&self) -> Result<Channel, QueueError> {
        let mut guard = self.state.lock().await;
        if let Some(pooled) = guard.as_ref() {
            if pooled.connection.status().connected() {
                return Ok(pooled.channel.clone());
            }
            warn!("broker connection lost, reconnecting");
            *guard = None;
        }

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|source| QueueError::Connect { source })?;
        let channel = connection.create_channel().await?;
        info!("broker connection established");
        *guard = Some(Pooled {
            connection,
            channel: channel.clone(),
        });
        Ok(channel)
    }

    /// Close the pooled connection, if one exists.
    pub async fn close(&self) {
        let pooled = self.state.lock().await.take();
        if let Some(pooled) = pooled {
            if let Err(err) = pooled.connection.close(200, "shutdown").await {
                warn!(error = %err, "broker connection close failed");
            }
        }
    }
}
