use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use portline_core::sanitize::mask_phone;
use portline_whatsapp::RoutingContext;

/// All fragments one sender produced during a quiescence window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoalescedBatch {
    pub sender: String,
    pub text: String,
    pub fragment_count: usize,
    pub routing: RoutingContext,
}

#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: CoalescedBatch);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("message buffer is shut down")]
    Closed,
}

struct PendingEntry {
    fragments: Vec<String>,
    routing: RoutingContext,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct PendingState {
    entries: HashMap<String, PendingEntry>,
    next_generation: u64,
    closed: bool,
}

struct BufferInner {
    state: Mutex<PendingState>,
    quiescence: Duration,
    handler: Arc<dyn BatchHandler>,
}

impl BufferInner {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hands the entry off only if `generation` is still the armed timer.
    async fn fire(&self, sender: &str, generation: u64) {
        let entry = {
            let mut state = self.lock();
            match state.entries.get(sender) {
                Some(entry) if entry.generation == generation => state.entries.remove(sender),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            debug!(sender = %mask_phone(sender), generation, "stale buffer timer ignored");
            return;
        };

        let batch = CoalescedBatch {
            sender: sender.to_string(),
            text: entry.fragments.join("\n"),
            fragment_count: entry.fragments.len(),
            routing: entry.routing,
        };
        info!(
            event_name = "ingress.buffer.flushed",
            sender = %mask_phone(sender),
            fragments = batch.fragment_count,
            "dispatching coalesced message"
        );
        self.handler.handle_batch(batch).await;
    }
}

/// Per-sender debounce buffer.
///
/// Each fragment re-arms the sender's quiescence timer. When a timer expires
/// with no newer fragment, the entry is removed under the same lock that
/// appends fragments, so a fragment either joins that batch or starts the next.
#[derive(Clone)]
pub struct MessageBuffer {
    inner: Arc<BufferInner>,
}

impl MessageBuffer {
    pub fn new(quiescence: Duration, handler: Arc<dyn BatchHandler>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                state: Mutex::new(PendingState::default()),
                quiescence,
                handler,
            }),
        }
    }

    pub fn quiescence(&self) -> Duration {
        self.inner.quiescence
    }

    /// Appends `text` and re-arms the timer. Returns the sender's buffered count.
    pub fn add_message(
        &self,
        sender: &str,
        text: &str,
        routing: RoutingContext,
    ) -> Result<usize, BufferError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(BufferError::Closed);
        }
        state.next_generation += 1;
        let generation = state.next_generation;

        let inner = Arc::clone(&self.inner);
        let owned_sender = sender.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.quiescence).await;
            inner.fire(&owned_sender, generation).await;
        });

        let buffered = match state.entries.get_mut(sender) {
            Some(entry) => {
                entry.timer.abort();
                entry.timer = timer;
                entry.generation = generation;
                entry.routing = routing;
                entry.fragments.push(text.to_string());
                entry.fragments.len()
            }
            None => {
                state.entries.insert(
                    sender.to_string(),
                    PendingEntry { fragments: vec![text.to_string()], routing, generation, timer },
                );
                1
            }
        };

        debug!(
            event_name = "ingress.whatsapp.message_buffered",
            sender = %mask_phone(sender),
            buffered,
            quiescence_ms = self.inner.quiescence.as_millis() as u64,
            "fragment buffered"
        );
        Ok(buffered)
    }

    /// Fragments waiting for `sender`; 0 when nothing is pending.
    pub fn buffer_size(&self, sender: &str) -> usize {
        self.inner.lock().entries.get(sender).map_or(0, |entry| entry.fragments.len())
    }

    pub fn pending_senders(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Stops accepting fragments and aborts every armed timer. Batches already
    /// handed off keep running. Returns how many pending batches were dropped.
    pub fn shutdown(&self) -> usize {
        let mut state = self.inner.lock();
        state.closed = true;
        let dropped = state.entries.len();
        for (sender, entry) in state.entries.drain() {
            entry.timer.abort();
            warn!(
                event_name = "ingress.buffer.dropped_on_shutdown",
                sender = %mask_phone(&sender),
                fragments = entry.fragments.len(),
                "pending fragments discarded"
            );
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use portline_whatsapp::RoutingContext;

    use super::{BatchHandler, BufferError, CoalescedBatch, MessageBuffer};

    struct ChannelHandler {
        tx: mpsc::UnboundedSender<CoalescedBatch>,
    }

    #[async_trait]
    impl BatchHandler for ChannelHandler {
        async fn handle_batch(&self, batch: CoalescedBatch) {
            let _ = self.tx.send(batch);
        }
    }

    fn buffer() -> (MessageBuffer, mpsc::UnboundedReceiver<CoalescedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MessageBuffer::new(Duration::from_secs(8), Arc::new(ChannelHandler { tx })), rx)
    }

    fn routing() -> RoutingContext {
        RoutingContext::new("106540352242922")
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_into_one_batch_in_arrival_order() {
        let (buffer, mut rx) = buffer();

        assert_eq!(buffer.add_message("525512345678", "Hola", routing()), Ok(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(buffer.add_message("525512345678", "Quiero un chip", routing()), Ok(2));

        let batch = rx.recv().await.expect("one batch");
        assert_eq!(batch.text, "Hola\nQuiero un chip");
        assert_eq!(batch.fragment_count, 2);
        assert_eq!(batch.routing, routing());
        assert_eq!(buffer.buffer_size("525512345678"), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err(), "no second delivery");
    }

    #[tokio::test(start_paused = true)]
    async fn each_fragment_restarts_the_window() {
        let (buffer, mut rx) = buffer();
        let started = tokio::time::Instant::now();

        buffer.add_message("525512345678", "uno", routing()).expect("add");
        tokio::time::sleep(Duration::from_secs(7)).await;
        buffer.add_message("525512345678", "dos", routing()).expect("add");

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.text, "uno\ndos");
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_cannot_steal_a_rearmed_entry() {
        let (buffer, mut rx) = buffer();
        buffer.add_message("525512345678", "a", routing()).expect("add");
        buffer.add_message("525512345678", "b", routing()).expect("add");

        // generation 1 was superseded by the second fragment
        buffer.inner.fire("525512345678", 1).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(buffer.buffer_size("525512345678"), 2);

        let batch = rx.recv().await.expect("batch");
        assert_eq!(batch.text, "a\nb");
    }

    #[tokio::test(start_paused = true)]
    async fn fragment_after_flush_starts_a_fresh_batch() {
        let (buffer, mut rx) = buffer();
        buffer.add_message("525512345678", "primero", routing()).expect("add");
        let first = rx.recv().await.expect("first batch");

        buffer.add_message("525512345678", "segundo", routing()).expect("add");
        let second = rx.recv().await.expect("second batch");

        assert_eq!(first.text, "primero");
        assert_eq!(second.text, "segundo");
    }

    #[tokio::test(start_paused = true)]
    async fn senders_are_independent() {
        let (buffer, mut rx) = buffer();
        buffer.add_message("525511111111", "hola", routing()).expect("add");
        buffer.add_message("525522222222", "buenas", routing()).expect("add");
        assert_eq!(buffer.pending_senders(), 2);

        let mut senders = vec![
            rx.recv().await.expect("batch").sender,
            rx.recv().await.expect("batch").sender,
        ];
        senders.sort();

        assert_eq!(senders, vec!["525511111111".to_string(), "525522222222".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_batches_and_refuses_new_fragments() {
        let (buffer, mut rx) = buffer();
        buffer.add_message("525511111111", "hola", routing()).expect("add");
        buffer.add_message("525522222222", "hola", routing()).expect("add");

        assert_eq!(buffer.shutdown(), 2);
        assert_eq!(
            buffer.add_message("525511111111", "tarde", routing()),
            Err(BufferError::Closed)
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
