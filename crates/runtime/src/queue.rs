//! Event queue with temporal debouncing.
//!
//! Producers append events through [`SyncQueue::sync_event`], which never
//! blocks on persistence: it appends to the pending list and pokes a
//! dedicated flusher task.  The flusher selects over the debounce timer,
//! force-flush requests, new-event notifications, and shutdown — so exactly
//! one flush body ever runs at a time and events reach the vault in strict
//! enqueue order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use udo_knowledge::error::KnowledgeError;
use udo_knowledge::schema::{DeadLetterRecord, Event};
use udo_knowledge::state::JsonlLog;

/// A transient flush failure is retried with 1 s × 2ⁿ backoff this many
/// times in total before the batch is dropped to the dead-letter log.
const MAX_FLUSH_ATTEMPTS: u32 = 3;

/// Persists one batch of events.  A single attempt — retries and
/// dead-lettering belong to the flusher.
pub trait BatchSink: Send + Sync + 'static {
    fn persist(&self, batch: &[Event]) -> impl Future<Output = Result<()>> + Send;

    /// Called once after a batch has been dropped to the dead-letter log.
    fn abandoned(&self, _batch: &[Event]) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }
}

enum FlusherSignal {
    /// Queue transitioned from empty outside the window: flush right away.
    Immediate,
    /// An event joined the queue: make sure a timer is armed.
    EventQueued,
    /// Synchronous flush on behalf of a caller awaiting the reply.
    ForceFlush(oneshot::Sender<Result<usize, String>>),
}

#[derive(Debug, Default)]
pub struct QueueState {
    pub pending: Vec<Event>,
    pub last_flush_at: Option<Instant>,
    pub shutting_down: bool,
    pub dropped_events: u64,
}

/// Cloneable producer handle over the shared queue.
#[derive(Clone)]
pub struct SyncQueue {
    state: Arc<Mutex<QueueState>>,
    signal_tx: mpsc::UnboundedSender<FlusherSignal>,
    window: Duration,
    max_pending: usize,
}

impl SyncQueue {
    /// Build the queue and spawn its flusher task.  The task runs until
    /// `shutdown_rx` flips to `true`, performing one terminal flush on the
    /// way out.
    pub fn spawn<S: BatchSink>(
        window: Duration,
        max_pending: usize,
        sink: Arc<S>,
        dead_letter: JsonlLog,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run_flusher(
            state.clone(),
            signal_rx,
            shutdown_rx,
            window,
            sink,
            dead_letter,
        ));

        (
            Self {
                state,
                signal_tx,
                window,
                max_pending,
            },
            handle,
        )
    }

    /// Enqueue an event.  Completes as soon as the event is appended and
    /// the flusher is poked — persistence happens later, off this call.
    ///
    /// A first event after an idle window triggers an immediate flush;
    /// otherwise the debounce timer is (re)used so bursts coalesce into one
    /// note.  Events beyond `max_pending` are dropped and counted.
    pub async fn sync_event(
        &self,
        event_type: &str,
        data: Map<String, Value>,
    ) -> Result<(), KnowledgeError> {
        let signal = {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return Err(KnowledgeError::ShuttingDown);
            }
            if state.pending.len() >= self.max_pending {
                state.dropped_events += 1;
                warn!(
                    event_type,
                    max_pending = self.max_pending,
                    "pending queue full — dropping event"
                );
                return Ok(());
            }

            let was_empty = state.pending.is_empty();
            state.pending.push(Event::new(event_type, data));

            let idle = state
                .last_flush_at
                .is_some_and(|at| at.elapsed() > self.window);
            if was_empty && idle {
                FlusherSignal::Immediate
            } else {
                FlusherSignal::EventQueued
            }
        };

        // The flusher outlives every producer handle except during
        // shutdown, where the terminal flush already covers this event.
        let _ = self.signal_tx.send(signal);
        Ok(())
    }

    /// Flush everything pending now, synchronously with respect to this
    /// caller.  Returns the number of events persisted; a flush that
    /// exhausted its retries surfaces the failure here.
    pub async fn force_flush(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.signal_tx
            .send(FlusherSignal::ForceFlush(reply_tx))
            .map_err(|_| anyhow::anyhow!(KnowledgeError::ShuttingDown))?;
        match reply_rx.await {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(message)) => Err(anyhow::anyhow!(message)),
            Err(_) => Err(anyhow::anyhow!(KnowledgeError::ShuttingDown)),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn dropped_count(&self) -> u64 {
        self.state.lock().await.dropped_events
    }

    /// Reject all future producers.  Called by the coordinator before it
    /// signals shutdown so post-`stop` `sync_event` calls fail fast.
    pub async fn begin_shutdown(&self) {
        self.state.lock().await.shutting_down = true;
    }
}

async fn run_flusher<S: BatchSink>(
    state: Arc<Mutex<QueueState>>,
    mut signal_rx: mpsc::UnboundedReceiver<FlusherSignal>,
    mut shutdown_rx: watch::Receiver<bool>,
    window: Duration,
    sink: Arc<S>,
    dead_letter: JsonlLog,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let timer = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = timer => {
                deadline = None;
                let _ = flush_once(&state, &sink, &dead_letter).await;
            }
            signal = signal_rx.recv() => match signal {
                Some(FlusherSignal::Immediate) => {
                    deadline = None;
                    let _ = flush_once(&state, &sink, &dead_letter).await;
                }
                Some(FlusherSignal::EventQueued) => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + window);
                    }
                }
                Some(FlusherSignal::ForceFlush(reply)) => {
                    deadline = None;
                    let outcome = flush_once(&state, &sink, &dead_letter).await;
                    let _ = reply.send(outcome.map_err(|err| format!("{err:#}")));
                }
                None => break,
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    // Terminal flush: nothing pending may be lost on stop.
                    match flush_once(&state, &sink, &dead_letter).await {
                        Ok(0) => {}
                        Ok(count) => info!(count, "terminal flush complete"),
                        Err(err) => error!(error = %format!("{err:#}"), "terminal flush failed"),
                    }
                    break;
                }
            }
        }
    }
}

/// Move the pending batch out and persist it.  Runs only inside the flusher
/// task, which is what guarantees at most one flush in flight.
async fn flush_once<S: BatchSink>(
    state: &Mutex<QueueState>,
    sink: &Arc<S>,
    dead_letter: &JsonlLog,
) -> Result<usize> {
    let batch = {
        let mut state = state.lock().await;
        std::mem::take(&mut state.pending)
    };
    if batch.is_empty() {
        return Ok(0);
    }
    let count = batch.len();

    let mut outcome = Ok(());
    for attempt in 0..MAX_FLUSH_ATTEMPTS {
        match sink.persist(&batch).await {
            Ok(()) => {
                outcome = Ok(());
                break;
            }
            Err(err) if attempt + 1 < MAX_FLUSH_ATTEMPTS => {
                let backoff = Duration::from_secs(1 << attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_secs = backoff.as_secs(),
                    error = %format!("{err:#}"),
                    "flush failed — retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                error!(
                    events = count,
                    error = %format!("{err:#}"),
                    "flush failed after retries — dead-lettering batch"
                );
                for event in &batch {
                    if let Err(dl_err) =
                        dead_letter.append(&DeadLetterRecord::from_event(event)).await
                    {
                        error!(error = %dl_err, "dead-letter append failed — event lost");
                    }
                }
                sink.abandoned(&batch).await;
                outcome = Err(err);
                break;
            }
        }
    }

    {
        let mut state = state.lock().await;
        state.last_flush_at = Some(Instant::now());
    }
    debug!(events = count, "flush cycle finished");
    outcome.map(|()| count)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    /// Sink that records every persisted batch as its event-type labels.
    #[derive(Default)]
    struct RecordingSink {
        batches: std::sync::Mutex<Vec<Vec<String>>>,
        fail_times: AtomicU32,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl BatchSink for RecordingSink {
        async fn persist(&self, batch: &[Event]) -> Result<()> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("injected persist failure");
            }
            self.batches.lock().unwrap().push(
                batch
                    .iter()
                    .map(|event| event.event_type().to_string())
                    .collect(),
            );
            Ok(())
        }
    }

    fn data(key: &str, value: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), json!(value));
        map
    }

    fn temp_dead_letter() -> (TempDir, JsonlLog) {
        let dir = TempDir::new().unwrap();
        let log = JsonlLog::new(dir.path().join("dead_letter.jsonl"));
        (dir, log)
    }

    fn spawn_queue(
        window_ms: u64,
        sink: Arc<RecordingSink>,
        dead_letter: &JsonlLog,
    ) -> (SyncQueue, JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, handle) = SyncQueue::spawn(
            Duration::from_millis(window_ms),
            10_000,
            sink,
            dead_letter.clone(),
            shutdown_rx,
        );
        (queue, handle, shutdown_tx)
    }

    #[tokio::test]
    async fn burst_within_window_coalesces_into_one_batch() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(200, sink.clone(), &dead_letter);

        queue.sync_event("e1", Map::new()).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.sync_event("e2", Map::new()).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.sync_event("e3", Map::new()).await?;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1, "burst must produce exactly one flush");
        assert_eq!(batches[0], vec!["e1", "e2", "e3"], "strict enqueue order");
        assert_eq!(queue.pending_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn event_after_idle_window_flushes_immediately() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(100, sink.clone(), &dead_letter);

        queue.sync_event("first", Map::new()).await?;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.batches().len(), 1, "first event flushes after the window");

        // Well past the window now: the next event must not wait.
        tokio::time::sleep(Duration::from_millis(150)).await;
        queue.sync_event("second", Map::new()).await?;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sink.batches().len(), 2, "idle-window event flushes immediately");
        Ok(())
    }

    #[tokio::test]
    async fn force_flush_returns_count_and_is_idempotent() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(60_000, sink.clone(), &dead_letter);

        queue.sync_event("a", data("k", "v")).await?;
        queue.sync_event("b", Map::new()).await?;

        assert_eq!(queue.force_flush().await?, 2);
        assert_eq!(queue.force_flush().await?, 0, "nothing left to flush");
        assert_eq!(sink.batches().len(), 1, "the empty flush performs no I/O");
        Ok(())
    }

    #[tokio::test]
    async fn force_flush_cancels_the_armed_timer() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(100, sink.clone(), &dead_letter);

        queue.sync_event("x", Map::new()).await?;
        queue.force_flush().await?;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batches().len(), 1, "timer must not fire a second flush");
        Ok(())
    }

    #[tokio::test]
    async fn transient_failures_are_retried() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_times.store(1, Ordering::SeqCst);
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(60_000, sink.clone(), &dead_letter);

        queue.sync_event("retryable", Map::new()).await?;
        let flushed = queue.force_flush().await?;
        assert_eq!(flushed, 1);
        assert_eq!(sink.batches().len(), 1, "second attempt succeeded");

        let records: Vec<DeadLetterRecord> = dead_letter.load()?;
        assert!(records.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_the_batch() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        sink.fail_times.store(MAX_FLUSH_ATTEMPTS, Ordering::SeqCst);
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, _handle, _shutdown) = spawn_queue(60_000, sink.clone(), &dead_letter);

        queue.sync_event("doomed", data("k", "v")).await?;
        let outcome = queue.force_flush().await;
        assert!(outcome.is_err(), "persist failure surfaces to force_flush");

        let records: Vec<DeadLetterRecord> = dead_letter.load()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "doomed");

        Ok(())
    }

    #[tokio::test]
    async fn shutdown_runs_a_terminal_flush_and_rejects_producers() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (queue, handle, shutdown_tx) = spawn_queue(60_000, sink.clone(), &dead_letter);

        queue.sync_event("pending-at-stop", Map::new()).await?;
        queue.begin_shutdown().await;
        shutdown_tx.send(true).ok();
        handle.await?;

        assert_eq!(sink.batches().len(), 1, "pending events flushed on stop");

        let refused = queue.sync_event("too-late", Map::new()).await;
        assert!(matches!(refused, Err(KnowledgeError::ShuttingDown)));
        Ok(())
    }

    #[tokio::test]
    async fn queue_cap_drops_and_counts_excess_events() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, dead_letter) = temp_dead_letter();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, _handle) = SyncQueue::spawn(
            Duration::from_secs(60),
            2,
            sink.clone(),
            dead_letter.clone(),
            shutdown_rx,
        );

        queue.sync_event("a", Map::new()).await?;
        queue.sync_event("b", Map::new()).await?;
        queue.sync_event("c", Map::new()).await?;

        assert_eq!(queue.pending_count().await, 2);
        assert_eq!(queue.dropped_count().await, 1);

        drop(shutdown_tx);
        Ok(())
    }
}
