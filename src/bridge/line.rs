//! Line-oriented bus: one `<topic> <payload>` message per line.
//!
//! Stands in for a broker when running the bridge by hand. Retained
//! publishes are written the same as any other.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{Bus, BusFuture, BusMessage, PublishOptions, topic_matches};
use crate::error::{Error, Result};

type Subscribers = Arc<Mutex<Vec<(String, mpsc::Sender<BusMessage>)>>>;

/// A bus over a pair of byte streams.
pub struct LineBus<W> {
    subscribers: Subscribers,
    writer: tokio::sync::Mutex<W>,
}

impl LineBus<tokio::io::Stdout> {
    /// Reads commands from stdin and writes publishes to stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> LineBus<W> {
    /// Creates a bus and spawns the reader task.
    #[must_use]
    pub fn new<Rd>(reader: Rd, writer: W) -> Self
    where
        Rd: AsyncBufRead + Unpin + Send + 'static,
    {
        let subscribers = Subscribers::default();
        tokio::spawn(read_loop(reader, Arc::clone(&subscribers)));
        Self {
            subscribers,
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

async fn read_loop<Rd>(reader: Rd, subscribers: Subscribers)
where
    Rd: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("bus read failed: {e}");
                break;
            }
        };
        let Some((topic, payload)) = line.trim().split_once(' ') else {
            if !line.trim().is_empty() {
                tracing::warn!("expected `<topic> <payload>`, got {line:?}");
            }
            continue;
        };

        let targets: Vec<mpsc::Sender<BusMessage>> = match subscribers.lock() {
            Ok(subscribers) => subscribers
                .iter()
                .filter(|(pattern, _)| topic_matches(pattern, topic))
                .map(|(_, tx)| tx.clone())
                .collect(),
            Err(_) => break,
        };
        for tx in targets {
            let message = BusMessage {
                topic: topic.to_string(),
                payload: payload.trim().as_bytes().to_vec(),
            };
            if tx.send(message).await.is_err() {
                tracing::debug!(topic, "subscriber gone");
            }
        }
    }
    // Subscriptions stay open: publishing goes on without an input side
    tracing::info!("bus input closed, no further commands");
}

impl<W: AsyncWrite + Unpin + Send + 'static> Bus for LineBus<W> {
    fn subscribe<'a>(
        &'a self,
        pattern: &'a str,
    ) -> BusFuture<'a, Result<mpsc::Receiver<BusMessage>>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(64);
            self.subscribers
                .lock()
                .map_err(|_| Error::Bus {
                    message: "subscriber list poisoned".into(),
                })?
                .push((pattern.to_string(), tx));
            Ok(rx)
        })
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: &'a [u8],
        options: PublishOptions,
    ) -> BusFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::trace!(topic, retain = options.retain, qos = options.qos, "publish");
            let mut line = Vec::with_capacity(topic.len() + payload.len() + 2);
            line.extend_from_slice(topic.as_bytes());
            line.push(b' ');
            line.extend_from_slice(payload);
            line.push(b'\n');

            let mut writer = self.writer.lock().await;
            writer.write_all(&line).await?;
            writer.flush().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_lines_delivered_to_matching_subscribers() {
        let (mut input, reader) = tokio::io::duplex(1024);
        let bus = LineBus::new(BufReader::new(reader), tokio::io::sink());
        let mut commands = bus.subscribe("lightbridge/+/set").await.unwrap();

        input
            .write_all(b"lightbridge/desk/state {}\nnonsense\nlightbridge/desk/set {\"state\":\"ON\"}\n")
            .await
            .unwrap();

        let message = commands.recv().await.unwrap();
        assert_eq!(message.topic, "lightbridge/desk/set");
        assert_eq!(message.payload, br#"{"state":"ON"}"#);

    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriptions_outlive_input() {
        let (input, reader) = tokio::io::duplex(64);
        let bus = LineBus::new(BufReader::new(reader), tokio::io::sink());
        let mut commands = bus.subscribe("lightbridge/+/set").await.unwrap();

        drop(input);
        let waited = tokio::time::timeout(Duration::from_secs(60), commands.recv()).await;

        assert!(waited.is_err(), "subscription closed at end of input");
        bus.publish("lightbridge/desk/availability", b"online", PublishOptions::RETAINED)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_writes_line() {
        let (writer, mut output) = tokio::io::duplex(1024);
        let bus = LineBus::new(BufReader::new(tokio::io::empty()), writer);

        bus.publish("lightbridge/desk/availability", b"online", PublishOptions::RETAINED)
            .await
            .unwrap();

        let mut lines = BufReader::new(&mut output).lines();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("lightbridge/desk/availability online")
        );
    }
}
