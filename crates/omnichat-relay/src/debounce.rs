use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use omnichat_core::config::RelayConfig;
use omnichat_core::{ConversationId, TenantId};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::kv::CoordinationStore;

/// Silence required before a buffered turn is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceWindows {
    pub base: Duration,
    /// Used when the fragment carries an image, so vision enrichment can land.
    pub image: Duration,
    /// Added on top of the timer for the single-flight lock lifetime.
    pub lock_grace: Duration,
}

impl DebounceWindows {
    pub fn from_config(cfg: &RelayConfig) -> Self {
        Self {
            base: Duration::from_secs(cfg.base_window_secs),
            image: Duration::from_secs(cfg.image_window_secs),
            lock_grace: Duration::from_secs(cfg.lock_grace_secs),
        }
    }
}

impl Default for DebounceWindows {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Everything one customer said during a quiet window, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedBatch {
    pub tenant: TenantId,
    pub conversation_id: ConversationId,
    pub external_user_id: String,
    pub messages: Vec<String>,
}

/// Receives drained batches. Implemented by the dispatch coordinator.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn deliver(&self, batch: BufferedBatch);
}

struct Keys {
    buffer: String,
    timer: String,
    lock: String,
}

impl Keys {
    fn new(tenant: TenantId, external_user_id: &str) -> Self {
        Self {
            buffer: format!("buffer:{tenant}:{external_user_id}"),
            timer: format!("timer:{tenant}:{external_user_id}"),
            lock: format!("active_task:{tenant}:{external_user_id}"),
        }
    }
}

/// Coalesces bursts of customer messages into one agent turn per identity.
///
/// State lives in the [`CoordinationStore`] so several relay instances
/// sharing a store still run at most one consumer per identity.
#[derive(Clone)]
pub struct DebounceRelay {
    store: Arc<dyn CoordinationStore>,
    sink: Arc<dyn DispatchSink>,
    windows: DebounceWindows,
}

impl DebounceRelay {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        sink: Arc<dyn DispatchSink>,
        windows: DebounceWindows,
    ) -> Self {
        Self { store, sink, windows }
    }

    /// Buffer one fragment and make sure a consumer is waiting on it.
    ///
    /// Returns `true` when this call started the consumer.
    pub async fn enqueue(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        external_user_id: &str,
        content: &str,
        has_image: bool,
    ) -> Result<bool> {
        let keys = Keys::new(tenant, external_user_id);
        let required = if has_image { self.windows.image } else { self.windows.base };

        let pending = self.store.rpush(&keys.buffer, content).await?;
        let ttl = self.store.extend_ttl_max(&keys.timer, required).await?;
        debug!(
            tenant = %tenant,
            external_user_id,
            pending,
            ttl_ms = ttl.as_millis() as u64,
            "fragment buffered"
        );

        let lock_ttl = self.windows.lock_grace + ttl;
        if !self.store.set_if_absent(&keys.lock, lock_ttl).await? {
            // The running consumer must outlive the slid timer.
            if self.store.extend_if_live(&keys.lock, lock_ttl).await? {
                return Ok(false);
            }
            // Released between the two calls.
            if !self.store.set_if_absent(&keys.lock, lock_ttl).await? {
                return Ok(false);
            }
        }

        self.spawn_consumer(tenant, conversation_id, external_user_id, keys);
        Ok(true)
    }

    fn spawn_consumer(
        &self,
        tenant: TenantId,
        conversation_id: &ConversationId,
        external_user_id: &str,
        keys: Keys,
    ) {
        info!(tenant = %tenant, external_user_id, "debounce consumer started");
        let relay = self.clone();
        let conversation_id = conversation_id.clone();
        let external_user_id = external_user_id.to_string();
        tokio::spawn(async move {
            relay.consume(tenant, conversation_id, external_user_id, keys).await;
        });
    }

    async fn consume(
        self,
        tenant: TenantId,
        conversation_id: ConversationId,
        external_user_id: String,
        keys: Keys,
    ) {
        let mut retried = false;
        loop {
            let drained = AssertUnwindSafe(self.wait_and_drain(&keys)).catch_unwind().await;

            if let Err(e) = self.store.delete(&keys.lock).await {
                warn!(tenant = %tenant, external_user_id = %external_user_id, error = %e, "failed to release debounce lock");
            }

            let messages = match drained {
                Ok(Ok(messages)) => messages,
                Ok(Err(e)) => {
                    error!(tenant = %tenant, external_user_id = %external_user_id, error = %e, "debounce wait failed");
                    // One retry so buffered fragments are not stranded.
                    if retried || !self.rearm(&keys).await {
                        return;
                    }
                    retried = true;
                    continue;
                }
                Err(_) => {
                    error!(tenant = %tenant, external_user_id = %external_user_id, "debounce consumer panicked");
                    return;
                }
            };

            retried = false;
            if messages.is_empty() {
                debug!(tenant = %tenant, external_user_id = %external_user_id, "buffer already empty");
            } else {
                info!(tenant = %tenant, external_user_id = %external_user_id, count = messages.len(), "dispatching buffered turn");
                self.sink
                    .deliver(BufferedBatch {
                        tenant,
                        conversation_id: conversation_id.clone(),
                        external_user_id: external_user_id.clone(),
                        messages,
                    })
                    .await;
            }

            // Fragments pushed after the drain but before the lock was
            // released found the lock held and spawned nobody.
            if !self.rearm(&keys).await {
                return;
            }
            debug!(tenant = %tenant, external_user_id = %external_user_id, "debounce consumer re-armed");
        }
    }

    async fn wait_and_drain(&self, keys: &Keys) -> Result<Vec<String>> {
        while let Some(remaining) = self.store.ttl(&keys.timer).await? {
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(remaining).await;
        }
        self.store.drain(&keys.buffer).await
    }

    async fn rearm(&self, keys: &Keys) -> bool {
        match self.store.llen(&keys.buffer).await {
            Ok(0) => false,
            Ok(_) => {
                let timer = match self.store.ttl(&keys.timer).await {
                    Ok(t) => t.unwrap_or_default(),
                    Err(e) => {
                        warn!(error = %e, "could not read debounce timer, using base window");
                        Duration::ZERO
                    }
                };
                let ttl = self.windows.lock_grace + timer.max(self.windows.base);
                match self.store.set_if_absent(&keys.lock, ttl).await {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        warn!(error = %e, "could not re-acquire debounce lock");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not inspect buffer after dispatch");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<BufferedBatch>>,
    }

    #[async_trait]
    impl DispatchSink for RecordingSink {
        async fn deliver(&self, batch: BufferedBatch) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    impl RecordingSink {
        fn texts(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().iter().map(|b| b.messages.clone()).collect()
        }
    }

    fn relay_with(store: Arc<dyn CoordinationStore>) -> (DebounceRelay, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (DebounceRelay::new(store, sink.clone(), DebounceWindows::default()), sink)
    }

    fn conv() -> ConversationId {
        ConversationId("conv-1".into())
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_in_order() {
        let (relay, sink) = relay_with(Arc::new(MemoryStore::new()));
        let t = TenantId(1);

        assert!(relay.enqueue(t, &conv(), "+5491111", "hola", false).await.unwrap());
        sleep(Duration::from_secs(2)).await;
        assert!(!relay.enqueue(t, &conv(), "+5491111", "quiero un turno", false).await.unwrap());
        sleep(Duration::from_secs(2)).await;
        relay.enqueue(t, &conv(), "+5491111", "para mañana", false).await.unwrap();

        sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.texts(), vec![vec!["hola", "quiero un turno", "para mañana"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_fragment_slides_the_window() {
        let (relay, sink) = relay_with(Arc::new(MemoryStore::new()));
        let t = TenantId(1);

        relay.enqueue(t, &conv(), "u", "a", false).await.unwrap();
        sleep(Duration::from_millis(9_500)).await;
        relay.enqueue(t, &conv(), "u", "b", false).await.unwrap();

        sleep(Duration::from_secs(5)).await;
        assert!(sink.texts().is_empty());

        sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.texts(), vec![vec!["a", "b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn image_window_is_not_shortened_by_text() {
        let (relay, sink) = relay_with(Arc::new(MemoryStore::new()));
        let t = TenantId(1);

        relay.enqueue(t, &conv(), "u", "[IMAGE]", true).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        relay.enqueue(t, &conv(), "u", "¿qué es esto?", false).await.unwrap();

        // Text alone would have fired at t=15.
        sleep(Duration::from_secs(11)).await;
        assert!(sink.texts().is_empty());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.texts(), vec![vec!["[IMAGE]", "¿qué es esto?"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_are_independent() {
        let (relay, sink) = relay_with(Arc::new(MemoryStore::new()));
        relay.enqueue(TenantId(1), &conv(), "a", "x", false).await.unwrap();
        relay.enqueue(TenantId(1), &conv(), "b", "y", false).await.unwrap();
        relay.enqueue(TenantId(2), &conv(), "a", "z", false).await.unwrap();

        sleep(Duration::from_secs(11)).await;
        let mut got = sink.texts();
        got.sort();
        assert_eq!(got, vec![vec!["x"], vec!["y"], vec!["z"]]);
    }

    /// Simulates an enqueue that lands between drain and lock release.
    struct RacingStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl CoordinationStore for RacingStore {
        async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
            self.inner.rpush(key, value).await
        }
        async fn llen(&self, key: &str) -> Result<usize> {
            self.inner.llen(key).await
        }
        async fn drain(&self, key: &str) -> Result<Vec<String>> {
            let out = self.inner.drain(key).await?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                self.inner.rpush(key, "late").await?;
                self.inner.extend_ttl_max("timer:1:u", Duration::from_secs(10)).await?;
            }
            Ok(out)
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            self.inner.ttl(key).await
        }
        async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration> {
            self.inner.extend_ttl_max(key, required).await
        }
        async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool> {
            self.inner.extend_if_live(key, required).await
        }
        async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.inner.set_if_absent(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fragment_racing_the_drain_is_not_stranded() {
        let store = Arc::new(RacingStore { inner: MemoryStore::new(), raced: AtomicBool::new(false) });
        let (relay, sink) = relay_with(store);

        relay.enqueue(TenantId(1), &conv(), "u", "first", false).await.unwrap();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(sink.texts(), vec![vec!["first".to_string()], vec!["late".to_string()]]);
    }

    /// Panics on the first TTL read.
    struct PanickyStore {
        inner: MemoryStore,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl CoordinationStore for PanickyStore {
        async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
            self.inner.rpush(key, value).await
        }
        async fn llen(&self, key: &str) -> Result<usize> {
            self.inner.llen(key).await
        }
        async fn drain(&self, key: &str) -> Result<Vec<String>> {
            self.inner.drain(key).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("store exploded");
            }
            self.inner.ttl(key).await
        }
        async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration> {
            self.inner.extend_ttl_max(key, required).await
        }
        async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool> {
            self.inner.extend_if_live(key, required).await
        }
        async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.inner.set_if_absent(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_released_when_the_wait_panics() {
        let store = Arc::new(PanickyStore { inner: MemoryStore::new(), panicked: AtomicBool::new(false) });
        let (relay, sink) = relay_with(store.clone());

        relay.enqueue(TenantId(1), &conv(), "u", "a", false).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(sink.texts().is_empty());
        assert!(store.set_if_absent("active_task:1:u", Duration::from_secs(1)).await.unwrap());
    }

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl CoordinationStore for FlakyStore {
        async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
            self.inner.rpush(key, value).await
        }
        async fn llen(&self, key: &str) -> Result<usize> {
            self.inner.llen(key).await
        }
        async fn drain(&self, key: &str) -> Result<Vec<String>> {
            self.inner.drain(key).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(rusqlite::Error::InvalidQuery.into());
            }
            self.inner.ttl(key).await
        }
        async fn extend_ttl_max(&self, key: &str, required: Duration) -> Result<Duration> {
            self.inner.extend_ttl_max(key, required).await
        }
        async fn extend_if_live(&self, key: &str, required: Duration) -> Result<bool> {
            self.inner.extend_if_live(key, required).await
        }
        async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.inner.set_if_absent(key, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_wait_still_delivers_buffered_fragments() {
        let (relay, sink) = relay_with(Arc::new(FlakyStore::default()));

        relay.enqueue(TenantId(1), &conv(), "u", "a", false).await.unwrap();
        sleep(Duration::from_secs(30)).await;

        assert_eq!(sink.texts(), vec![vec!["a".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_burst_keeps_a_single_consumer() {
        let (relay, sink) = relay_with(Arc::new(MemoryStore::new()));
        let t = TenantId(1);

        // Spans well past the initial lock lifetime.
        let mut started = 0;
        for i in 0..12 {
            if relay.enqueue(t, &conv(), "u", &format!("m{i}"), false).await.unwrap() {
                started += 1;
            }
            sleep(Duration::from_secs(9)).await;
        }
        sleep(Duration::from_secs(30)).await;

        assert_eq!(started, 1);
        let expected: Vec<String> = (0..12).map(|i| format!("m{i}")).collect();
        assert_eq!(sink.texts(), vec![expected]);
    }
}
