//! AMQP (RabbitMQ) bus client.
//!
//! Owns the broker connection/channel pair, declares the topic exchange,
//! publishes JSON messages, and supervises reconnection. Consumer
//! registrations are made once at startup and survive reconnects: each
//! registration runs a single loop that waits for a live channel and
//! re-declares its (idempotent) queue and binding after every drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, info, warn};

use super::EXCHANGE_NAME;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No live channel; publish is best-effort and never queues or blocks.
    #[error("broker channel not ready")]
    NotReady,

    #[error("bus is shutting down")]
    ShuttingDown,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for messages delivered to a consumer queue.
///
/// `Ok` acknowledges the message; `Err` negatively acknowledges it with
/// requeue, so the broker redelivers (at-least-once, unordered).
pub trait EventHandler: Send + Sync {
    fn handle<'a>(&'a self, body: &'a [u8]) -> BoxFuture<'a, Result<(), HandlerError>>;
}

struct ConsumerReg {
    queue: String,
    binding_key: String,
    handler: Arc<dyn EventHandler>,
}

struct Live {
    conn: Connection,
    channel: Channel,
}

struct BusInner {
    url: String,
    reconnect_wait: Duration,
    /// The single authoritative connection/channel pair. Readers snapshot
    /// the channel under the read lock; the lock is never held across a
    /// network call.
    live: RwLock<Option<Live>>,
    /// Flipped on connect/disconnect/close; waiters re-check `live` and
    /// the shutdown flag on every change.
    ready: watch::Sender<bool>,
    shutdown: AtomicBool,
    consumers: Mutex<Vec<Arc<ConsumerReg>>>,
}

/// Cheap-to-clone handle to the process-wide bus client.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a disconnected client. `init` performs the first dial.
    pub fn new(url: impl Into<String>, reconnect_wait: Duration) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                url: url.into(),
                reconnect_wait,
                live: RwLock::new(None),
                ready,
                shutdown: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Dial the broker and declare the exchange. The initial connection
    /// failure is reported to the caller; once connected, a monitor task
    /// re-establishes the connection after drops until `close` is called.
    pub async fn init(&self) -> Result<(), BusError> {
        let closed = self.dial_and_setup().await?;
        let bus = self.clone();
        tokio::spawn(async move { bus.monitor(closed).await });
        Ok(())
    }

    async fn dial_and_setup(&self) -> Result<mpsc::UnboundedReceiver<lapin::Error>, BusError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(BusError::ShuttingDown);
        }

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .map_err(|e| BusError::Connection(format!("dial failed: {e}")))?;

        // On any failure below, dropping `conn` releases the partial state.
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("channel open failed: {e}")))?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Connection(format!("exchange declare failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        conn.on_error(move |err| {
            let _ = tx.send(err);
        });

        {
            let mut live = self.inner.live.write().await;
            // A close may have landed while we were dialing; storing the
            // fresh connection now would resurrect the bus after close.
            if self.inner.shutdown.load(Ordering::SeqCst) {
                drop(live);
                let _ = conn.close(200, "shutdown").await;
                return Err(BusError::ShuttingDown);
            }
            *live = Some(Live { conn, channel });
        }
        let _ = self.inner.ready.send(true);

        let consumers = self.consumer_count().await;
        info!(
            exchange = EXCHANGE_NAME,
            consumers,
            "connected to broker, exchange declared"
        );
        Ok(rx)
    }

    /// Single monitor loop: blocks until the connection reports an error,
    /// then cleans up and redials with a fixed backoff until success or
    /// shutdown. A close notification with the shutdown flag set means the
    /// close was deliberate and the monitor exits.
    async fn monitor(&self, mut closed: mpsc::UnboundedReceiver<lapin::Error>) {
        loop {
            let err = closed.recv().await;
            if self.inner.shutdown.load(Ordering::SeqCst) {
                info!("broker connection closed gracefully");
                return;
            }
            match err {
                Some(e) => warn!(error = %e, "broker connection lost, will reconnect"),
                None => warn!("broker close notifications ended, will reconnect"),
            }

            self.cleanup().await;

            loop {
                if self.inner.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match self.dial_and_setup().await {
                    Ok(rx) => {
                        closed = rx;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "reconnect attempt failed");
                        tokio::time::sleep(self.inner.reconnect_wait).await;
                    }
                }
            }
        }
    }

    /// Drop the dead connection/channel handles so publishers fail fast
    /// and consumer loops go back to waiting.
    async fn cleanup(&self) {
        let live = self.inner.live.write().await.take();
        drop(live);
        let _ = self.inner.ready.send(false);
    }

    /// Serialize `msg` to JSON and publish it on the topic exchange with
    /// persistent delivery. Fails immediately with `NotReady` when no live
    /// channel exists; callers treat publish as best-effort.
    pub async fn publish<T: Serialize>(&self, routing_key: &str, msg: &T) -> Result<(), BusError> {
        let channel = self.snapshot_channel().await.ok_or(BusError::NotReady)?;

        let body = serde_json::to_vec(msg).map_err(|e| BusError::Publish(e.to_string()))?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        channel
            .basic_publish(
                EXCHANGE_NAME,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        debug!(routing_key, "published message");
        Ok(())
    }

    /// Register a durable consumer. The registration is process-wide and
    /// permanent; its loop starts delivering as soon as a channel is live,
    /// whether or not one exists yet.
    pub async fn consume(&self, queue: &str, binding_key: &str, handler: Arc<dyn EventHandler>) {
        let reg = Arc::new(ConsumerReg {
            queue: queue.to_string(),
            binding_key: binding_key.to_string(),
            handler,
        });
        self.inner.consumers.lock().await.push(reg.clone());

        let bus = self.clone();
        tokio::spawn(async move { bus.consumer_loop(reg).await });
    }

    /// Per-registration processing loop. Queue and binding declarations are
    /// idempotent, so re-running the setup after a reconnect never creates
    /// duplicate consumer instances.
    async fn consumer_loop(&self, reg: Arc<ConsumerReg>) {
        loop {
            let Some(channel) = self.wait_for_channel().await else {
                // shutdown requested
                return;
            };

            if let Err(e) = channel
                .queue_declare(
                    &reg.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                warn!(queue = %reg.queue, error = %e, "queue declare failed, retrying");
                tokio::time::sleep(self.inner.reconnect_wait).await;
                continue;
            }

            if let Err(e) = channel
                .queue_bind(
                    &reg.queue,
                    EXCHANGE_NAME,
                    &reg.binding_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                warn!(queue = %reg.queue, binding_key = %reg.binding_key, error = %e,
                    "queue bind failed, retrying");
                tokio::time::sleep(self.inner.reconnect_wait).await;
                continue;
            }

            let mut consumer = match channel
                .basic_consume(
                    &reg.queue,
                    "",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(queue = %reg.queue, error = %e, "consume failed, retrying");
                    tokio::time::sleep(self.inner.reconnect_wait).await;
                    continue;
                }
            };

            info!(queue = %reg.queue, binding_key = %reg.binding_key, "consumer started");

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(queue = %reg.queue, error = %e, "delivery stream error");
                        break;
                    }
                };

                // Handler decides ack/nack via its result.
                match reg.handler.handle(&delivery.data).await {
                    Ok(()) => {
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(queue = %reg.queue, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        warn!(queue = %reg.queue, error = %e, "handler failed, nacking for redelivery");
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            })
                            .await;
                    }
                }
            }

            debug!(queue = %reg.queue, "consumer stream ended, waiting for connection");
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Cooperatively wait for a live channel. Returns `None` once shutdown
    /// is requested so loops can exit instead of waiting forever.
    pub(crate) async fn wait_for_channel(&self) -> Option<Channel> {
        let mut ready = self.inner.ready.subscribe();
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(channel) = self.snapshot_channel().await {
                return Some(channel);
            }
            if ready.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn snapshot_channel(&self) -> Option<Channel> {
        self.inner
            .live
            .read()
            .await
            .as_ref()
            .map(|l| l.channel.clone())
    }

    pub(crate) async fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().await.len()
    }

    /// Set the shutdown flag, close the connection if present, and wake
    /// every waiter so it can observe the flag. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);

        let live = self.inner.live.write().await.take();
        if let Some(live) = live {
            if let Err(e) = live.channel.close(200, "shutdown").await {
                warn!(error = %e, "channel close error");
            }
            if let Err(e) = live.conn.close(200, "shutdown").await {
                warn!(error = %e, "connection close error");
            }
        }
        let _ = self.inner.ready.send(false);
        info!("bus closed");
    }
}
