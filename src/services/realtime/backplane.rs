use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;

use crate::settings::{self, BackplaneKind};

const FANOUT_CAPACITY: usize = 1024;

/// One encoded frame addressed to a room, optionally skipping the socket
/// that caused it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
    pub frame: String,
}

/// Shared publish/subscribe channel between every process serving sockets.
/// Each subscriber sees every envelope published by any process, its own
/// included.
#[async_trait]
pub trait Backplane: Send + Sync + 'static {
    async fn publish(&self, envelope: Envelope) -> Result<(), anyhow::Error>;

    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// Single-process backplane.
pub struct LocalBackplane {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBackplane {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FANOUT_CAPACITY);
        Self { sender }
    }
}

impl Default for LocalBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for LocalBackplane {
    async fn publish(&self, envelope: Envelope) -> Result<(), anyhow::Error> {
        // No subscribers just means nobody is listening yet.
        let _ = self.sender.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

/// Fans out through `pg_notify` on one channel. Payloads above the
/// Postgres NOTIFY limit (8000 bytes) fail to publish.
pub struct PostgresBackplane {
    pool: PgPool,
    channel: String,
    sender: broadcast::Sender<Envelope>,
}

impl PostgresBackplane {
    pub async fn connect(pool: PgPool, channel: &str) -> Result<Self, anyhow::Error> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(channel).await?;

        let (sender, _) = broadcast::channel(FANOUT_CAPACITY);
        let fanout = sender.clone();
        let listen_channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<Envelope>(notification.payload()) {
                            Ok(envelope) => {
                                let _ = fanout.send(envelope);
                            }
                            Err(e) => {
                                log::warn!("Dropping malformed notification on {}: {}", listen_channel, e)
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Backplane listener on {} failed: {}", listen_channel, e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        log::info!("Listening for realtime events on Postgres channel {}.", channel);

        Ok(Self {
            pool,
            channel: channel.to_string(),
            sender,
        })
    }
}

#[async_trait]
impl Backplane for PostgresBackplane {
    async fn publish(&self, envelope: Envelope) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(&envelope)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

pub async fn connect(
    settings: &settings::Realtime,
    pool: &PgPool,
) -> Result<Arc<dyn Backplane>, anyhow::Error> {
    match settings.backplane {
        BackplaneKind::Local => Ok(Arc::new(LocalBackplane::new())),
        BackplaneKind::Postgres => {
            let backplane = PostgresBackplane::connect(pool.clone(), &settings.channel).await?;
            Ok(Arc::new(backplane))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backplane_reaches_every_subscriber() {
        let backplane = LocalBackplane::new();
        let mut first = backplane.subscribe();
        let mut second = backplane.subscribe();

        let envelope = Envelope {
            room: "c1".into(),
            except: None,
            frame: "{}".into(),
        };
        backplane.publish(envelope.clone()).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), envelope);
        assert_eq!(second.recv().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_not_an_error() {
        let backplane = LocalBackplane::new();
        let envelope = Envelope {
            room: "c1".into(),
            except: Some("s1".into()),
            frame: "{}".into(),
        };
        assert!(backplane.publish(envelope).await.is_ok());
    }

    #[test]
    fn envelopes_omit_empty_exclusions() {
        let json = serde_json::to_value(Envelope {
            room: "global".into(),
            except: None,
            frame: "x".into(),
        })
        .unwrap();
        assert!(json.get("except").is_none());
    }
}
