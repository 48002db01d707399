//! Redis pub/sub transport
//!
//! Publishing goes through a `deadpool-redis` pool. Subscriptions share one
//! dedicated pub/sub connection split into a command sink and a message
//! stream; a listener task reads the stream and hands each message to the
//! channel's or pattern's delivery. When the stream ends the listener
//! reconnects with exponential backoff and re-issues every channel and
//! pattern.

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use courier_core::{
    Message, PubSubError, PubSubResult, PublishOptions, SubscribeOptions, UnsubscribeOptions,
};
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::{PubSubSink, PubSubStream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::shell::{BaseDriver, ShellConfig, ShellPlugins};
use crate::transport::{Delivery, Inbound, Transport};

const DRIVER: &str = "redis";

/// Redis transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Publish connection pool size
    pub pool_size: usize,
    /// Timeout for the initial connection and PING
    #[serde(with = "courier_reliability::duration")]
    pub connect_timeout: Duration,
    /// First delay before re-establishing a dropped subscriber connection
    #[serde(with = "courier_reliability::duration")]
    pub reconnect_min_delay: Duration,
    /// Ceiling on the reconnect delay
    #[serde(with = "courier_reliability::duration")]
    pub reconnect_max_delay: Duration,
    /// Give up after this many reconnect attempts; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max_attempts: Option<usize>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
            reconnect_min_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_max_attempts: None,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.reconnect_min_delay)
            .with_max_delay(self.reconnect_max_delay)
            .with_jitter();
        match self.reconnect_max_attempts {
            Some(max) => builder.with_max_times(max),
            None => builder.without_max_times(),
        }
    }
}

/// Deliveries keyed by channel and by pattern
#[derive(Default)]
struct Routes {
    channels: HashMap<String, Delivery>,
    patterns: HashMap<String, Delivery>,
}

type SharedRoutes = Arc<RwLock<Routes>>;
type SharedSink = Arc<tokio::sync::Mutex<PubSubSink>>;

fn read_routes(routes: &SharedRoutes) -> std::sync::RwLockReadGuard<'_, Routes> {
    routes.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_routes(routes: &SharedRoutes) -> std::sync::RwLockWriteGuard<'_, Routes> {
    routes.write().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    pool: deadpool_redis::Pool,
    sink: SharedSink,
    listener: JoinHandle<()>,
}

/// Transport speaking Redis `PUBLISH` / `SUBSCRIBE` / `PSUBSCRIBE`
pub struct RedisTransport {
    config: RedisConfig,
    routes: SharedRoutes,
    connection: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
}

impl RedisTransport {
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            routes: Arc::new(RwLock::new(Routes::default())),
            connection: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn pool(&self) -> PubSubResult<deadpool_redis::Pool> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.pool.clone())
            .ok_or_else(|| PubSubError::NotConnected {
                driver: DRIVER.to_string(),
            })
    }

    fn sink(&self) -> PubSubResult<SharedSink> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| Arc::clone(&c.sink))
            .ok_or_else(|| PubSubError::NotConnected {
                driver: DRIVER.to_string(),
            })
    }

    async fn open_pool(&self) -> PubSubResult<deadpool_redis::Pool> {
        let mut pool_config = deadpool_redis::Config::from_url(&self.config.url);
        pool_config.pool = Some(deadpool_redis::PoolConfig::new(self.config.pool_size));
        let pool = pool_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| PubSubError::connection(DRIVER, e.to_string()))?;

        let ping = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| PubSubError::connection(DRIVER, e.to_string()))?;
            redis::cmd("PING")
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| PubSubError::connection(DRIVER, format!("PING failed: {}", e)))
        };
        tokio::time::timeout(self.config.connect_timeout, ping)
            .await
            .map_err(|_| {
                PubSubError::connection(
                    DRIVER,
                    format!("timed out after {:?} connecting to Redis", self.config.connect_timeout),
                )
            })??;

        Ok(pool)
    }
}

async fn open_pubsub(client: &redis::Client) -> PubSubResult<(PubSubSink, PubSubStream)> {
    let pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| PubSubError::connection(DRIVER, e.to_string()))?;
    Ok(pubsub.split())
}

/// Re-issue every registered channel and pattern on a fresh sink
async fn resubscribe(sink: &mut PubSubSink, routes: &SharedRoutes) -> PubSubResult<()> {
    let (channels, patterns): (Vec<String>, Vec<String>) = {
        let routes = read_routes(routes);
        (
            routes.channels.keys().cloned().collect(),
            routes.patterns.keys().cloned().collect(),
        )
    };
    for channel in &channels {
        sink.subscribe(channel)
            .await
            .map_err(|e| PubSubError::subscription(channel, e.to_string()))?;
    }
    for pattern in &patterns {
        sink.psubscribe(pattern)
            .await
            .map_err(|e| PubSubError::subscription(pattern, e.to_string()))?;
    }
    debug!(
        channels = channels.len(),
        patterns = patterns.len(),
        "Restored Redis subscriptions"
    );
    Ok(())
}

fn route_for(routes: &SharedRoutes, msg: &redis::Msg) -> Option<Delivery> {
    let routes = read_routes(routes);
    if msg.from_pattern() {
        let pattern: String = msg.get_pattern().ok()?;
        routes.patterns.get(&pattern).cloned()
    } else {
        routes.channels.get(msg.get_channel_name()).cloned()
    }
}

/// Read the subscriber stream, reconnecting whenever it ends
async fn listen(
    client: redis::Client,
    mut stream: PubSubStream,
    sink: SharedSink,
    routes: SharedRoutes,
    connected: Arc<AtomicBool>,
    backoff: ExponentialBuilder,
) {
    loop {
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let Some(delivery) = route_for(&routes, &msg) else {
                debug!(channel = %channel, "No route for Redis message, dropping");
                continue;
            };
            let inbound = Inbound::Raw {
                topic: channel.clone(),
                payload: msg.get_payload_bytes().to_vec(),
            };
            if let Err(err) = delivery.deliver(inbound).await {
                warn!(channel = %channel, error = %err, "Redis delivery failed");
            }
        }

        warn!("Redis subscriber stream ended, reconnecting");
        let mut delays = backoff.build();
        stream = loop {
            let Some(delay) = delays.next() else {
                error!("Giving up on the Redis subscriber connection");
                connected.store(false, Ordering::SeqCst);
                return;
            };
            tokio::time::sleep(delay).await;

            let (mut new_sink, new_stream) = match open_pubsub(&client).await {
                Ok(pair) => pair,
                Err(err) => {
                    error!(
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "Redis reconnect failed, retrying after backoff"
                    );
                    continue;
                }
            };

            let mut current = sink.lock().await;
            match resubscribe(&mut new_sink, &routes).await {
                Ok(()) => {
                    *current = new_sink;
                    info!("Redis subscriber reconnected");
                    break new_stream;
                }
                Err(err) => {
                    error!(error = %err, "Failed to restore Redis subscriptions");
                }
            }
        };
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &str {
        DRIVER
    }

    async fn connect(&self) -> PubSubResult<()> {
        let pool = self.open_pool().await?;
        let client = redis::Client::open(self.config.url.as_str())
            .map_err(|e| PubSubError::connection(DRIVER, e.to_string()))?;
        let (sink, stream) = open_pubsub(&client).await?;
        let sink = Arc::new(tokio::sync::Mutex::new(sink));

        let listener = tokio::spawn(listen(
            client,
            stream,
            Arc::clone(&sink),
            Arc::clone(&self.routes),
            Arc::clone(&self.connected),
            self.config.backoff(),
        ));

        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connection {
            pool,
            sink,
            listener,
        });
        self.connected.store(true, Ordering::SeqCst);
        debug!(url = %self.config.url, "Redis transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> PubSubResult<()> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.connected.store(false, Ordering::SeqCst);

        {
            let mut routes = write_routes(&self.routes);
            routes.channels.clear();
            routes.patterns.clear();
        }

        if let Some(connection) = connection {
            connection.listener.abort();
            connection.pool.close();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_internal(
        &self,
        topic: &str,
        message: &Message,
        _options: &PublishOptions,
    ) -> PubSubResult<()> {
        let payload = message.to_bytes()?;
        let mut conn = self
            .pool()?
            .get()
            .await
            .map_err(|e| PubSubError::connection(DRIVER, e.to_string()))?;

        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(PubSubError::backend)?;
        debug!(topic, message_id = %message.id, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe_internal(
        &self,
        topic: &str,
        delivery: Delivery,
        options: &SubscribeOptions,
    ) -> PubSubResult<()> {
        let sink = self.sink()?;
        {
            let mut routes = write_routes(&self.routes);
            let table = if options.pattern {
                &mut routes.patterns
            } else {
                &mut routes.channels
            };
            table.insert(topic.to_string(), delivery);
        }

        let mut sink = sink.lock().await;
        let result = if options.pattern {
            sink.psubscribe(topic).await
        } else {
            sink.subscribe(topic).await
        };
        if let Err(e) = result {
            let mut routes = write_routes(&self.routes);
            routes.channels.remove(topic);
            routes.patterns.remove(topic);
            return Err(PubSubError::subscription(topic, e.to_string()));
        }
        debug!(topic, pattern = options.pattern, "Subscribed on Redis");
        Ok(())
    }

    async fn unsubscribe_internal(
        &self,
        topic: &str,
        options: &UnsubscribeOptions,
    ) -> PubSubResult<()> {
        {
            let mut routes = write_routes(&self.routes);
            if options.pattern {
                routes.patterns.remove(topic);
            } else {
                routes.channels.remove(topic);
            }
        }

        let sink = self.sink()?;
        let mut sink = sink.lock().await;
        let result = if options.pattern {
            sink.punsubscribe(topic).await
        } else {
            sink.unsubscribe(topic).await
        };
        result.map_err(|e| PubSubError::subscription(topic, e.to_string()))
    }
}

/// Redis transport wrapped in the reliability shell
pub type RedisDriver = BaseDriver<RedisTransport>;

impl BaseDriver<RedisTransport> {
    pub fn redis(redis: RedisConfig, config: ShellConfig, plugins: ShellPlugins) -> PubSubResult<Self> {
        Self::new(RedisTransport::new(redis), config, plugins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::PubSubDriver;
    use std::time::Duration;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::new("redis://cache:6380")
            .with_pool_size(20)
            .with_connect_timeout(Duration::from_secs(2));

        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_redis_config_deserializes_durations() {
        let config: RedisConfig = serde_json::from_value(serde_json::json!({
            "url": "redis://other:6379",
            "connect_timeout": "250ms",
            "reconnect_max_attempts": 3
        }))
        .unwrap();

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.reconnect_max_attempts, Some(3));
        assert_eq!(config.pool_size, 10);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let driver =
            RedisDriver::redis(RedisConfig::default(), ShellConfig::default(), ShellPlugins::default())
                .unwrap();

        assert!(!driver.is_connected());
        let err = driver
            .publish("orders", serde_json::json!(1), PublishOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PUBSUB_NOT_CONNECTED");
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[tokio::test]
    async fn test_roundtrip_against_live_redis() {
        let driver = RedisDriver::redis(
            RedisConfig::new(redis_url()).with_connect_timeout(Duration::from_millis(500)),
            ShellConfig::default(),
            ShellPlugins::default(),
        )
        .unwrap();
        if driver.connect().await.is_err() {
            eprintln!("Skipping Redis test: server not reachable");
            return;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let topic = format!("courier.test.{}", uuid::Uuid::new_v4());
        driver
            .subscribe(
                &topic,
                courier_core::handler_fn(move |msg: Message| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(msg);
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        let id = driver
            .publish(&topic, serde_json::json!({"n": 1}), PublishOptions::default())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.data["n"], 1);

        driver.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscriptions_restored_after_connection_killed() {
        let mut config =
            RedisConfig::new(redis_url()).with_connect_timeout(Duration::from_millis(500));
        config.reconnect_min_delay = Duration::from_millis(20);
        config.reconnect_max_delay = Duration::from_millis(200);
        let driver =
            RedisDriver::redis(config, ShellConfig::default(), ShellPlugins::default()).unwrap();
        if driver.connect().await.is_err() {
            eprintln!("Skipping Redis test: server not reachable");
            return;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let channel = format!("courier.test.{}", uuid::Uuid::new_v4());
        let pattern = format!("{channel}.*");
        for (topic, options) in [
            (channel.clone(), SubscribeOptions::default()),
            (pattern, SubscribeOptions::pattern()),
        ] {
            let tx = tx.clone();
            driver
                .subscribe(
                    &topic,
                    courier_core::handler_fn(move |msg: Message| {
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(msg.topic);
                            Ok(())
                        }
                    }),
                    options,
                )
                .await
                .unwrap();
        }

        let mut conn = driver.transport().pool().unwrap().get().await.unwrap();
        let killed: i64 = redis::cmd("CLIENT")
            .arg("KILL")
            .arg("TYPE")
            .arg("pubsub")
            .query_async(&mut *conn)
            .await
            .unwrap();
        assert!(killed >= 1);

        // Messages published while the listener reconnects are lost
        let nested = format!("{channel}.eu");
        let mut seen = Vec::new();
        for _ in 0..50 {
            for topic in [&channel, &nested] {
                driver
                    .publish(topic, serde_json::json!({}), PublishOptions::default())
                    .await
                    .unwrap();
            }
            while let Ok(Some(topic)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                if !seen.contains(&topic) {
                    seen.push(topic);
                }
            }
            if seen.len() == 2 {
                break;
            }
        }

        seen.sort();
        assert_eq!(seen, vec![channel.clone(), nested]);
        assert!(driver.is_connected());
        driver.disconnect().await.unwrap();
    }
}
