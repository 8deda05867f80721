use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::{ExporterError, Result};

pub const DEFAULT_COUNT_THRESHOLD: usize = 1000;
pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_secs(1);
pub const DEFAULT_BUFFERED_LIMIT: usize = 100_000;

/// Receives each bundle once its count or delay threshold is reached.
#[async_trait]
pub trait BundleHandler<T>: Send + Sync {
    async fn handle(&self, bundle: Vec<T>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundlerOptions {
    /// Pending records that trigger an immediate send.
    pub count_threshold: usize,
    /// Longest a record waits before its bundle is sent.
    pub delay_threshold: Duration,
    /// Pending plus in-flight records beyond which `add` fails.
    pub buffered_limit: usize,
}

impl Default for BundlerOptions {
    fn default() -> Self {
        Self {
            count_threshold: DEFAULT_COUNT_THRESHOLD,
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            buffered_limit: DEFAULT_BUFFERED_LIMIT,
        }
    }
}

struct State<T> {
    pending: Vec<T>,
    /// When the first record of the pending bundle arrived.
    opened_at: Option<Instant>,
    in_flight_records: usize,
    /// Sequence numbers of bundles being handled.
    in_flight: BTreeSet<u64>,
    next_seq: u64,
    closed: bool,
}

struct Bundle<T> {
    seq: u64,
    items: Vec<T>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    handler: Arc<dyn BundleHandler<T>>,
    options: BundlerOptions,
    opened: Notify,
    sent: Notify,
}

/// Groups records into bundles and hands them to a [`BundleHandler`].
///
/// Sends run on whichever task crossed the threshold: the caller of `add`
/// for count-triggered bundles, the delay timer otherwise. Concurrent sends
/// for the same bundler are allowed.
pub struct Bundler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Bundler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Keeps the in-flight accounting right even if a handler panics.
struct InFlight<'a, T> {
    inner: &'a Inner<T>,
    seq: u64,
    records: usize,
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.in_flight_records -= self.records;
        state.in_flight.remove(&self.seq);
        self.inner.sent.notify_waiters();
    }
}

impl<T: Send + 'static> Inner<T> {
    /// Moves the pending bundle to in-flight. Caller holds the lock.
    fn take(state: &mut State<T>) -> Option<Bundle<T>> {
        if state.pending.is_empty() {
            return None;
        }
        let items = std::mem::take(&mut state.pending);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.opened_at = None;
        state.in_flight_records += items.len();
        state.in_flight.insert(seq);
        Some(Bundle { seq, items })
    }

    fn take_due(&self, now: Instant) -> Option<Bundle<T>> {
        let mut state = self.state.lock();
        match state.opened_at {
            Some(opened) if opened + self.options.delay_threshold <= now => Self::take(&mut state),
            _ => None,
        }
    }

    async fn send(&self, bundle: Bundle<T>) {
        let _guard = InFlight {
            inner: self,
            seq: bundle.seq,
            records: bundle.items.len(),
        };
        self.handler.handle(bundle.items).await;
    }
}

impl<T: Send + 'static> Bundler<T> {
    pub fn new(handler: Arc<dyn BundleHandler<T>>, options: BundlerOptions) -> Self {
        let options = BundlerOptions {
            count_threshold: options.count_threshold.max(1),
            ..options
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: Vec::new(),
                    opened_at: None,
                    in_flight_records: 0,
                    in_flight: BTreeSet::new(),
                    next_seq: 0,
                    closed: false,
                }),
                handler,
                options,
                opened: Notify::new(),
                sent: Notify::new(),
            }),
        }
    }

    /// Number of records waiting for the next bundle.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Queues one record. When this record fills the bundle, the bundle is
    /// sent before `add` returns.
    ///
    /// Fails with [`ExporterError::Overflow`] instead of waiting when the
    /// buffered limit is reached.
    pub async fn add(&self, item: T) -> Result<()> {
        let bundle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ExporterError::Closed);
            }

            let limit = self.inner.options.buffered_limit;
            if state.pending.len() + state.in_flight_records >= limit {
                return Err(ExporterError::Overflow { limit });
            }

            if state.pending.is_empty() {
                state.opened_at = Some(Instant::now());
                self.inner.opened.notify_one();
            }
            state.pending.push(item);

            if state.pending.len() >= self.inner.options.count_threshold {
                Inner::take(&mut state)
            } else {
                None
            }
        };

        if let Some(bundle) = bundle {
            self.inner.send(bundle).await;
        }
        Ok(())
    }

    /// Sends whatever is pending and waits until every bundle taken before
    /// this call, including ones started elsewhere, has been handled.
    /// Bundles started after the call are not waited for.
    pub async fn flush(&self) {
        let (bundle, horizon) = {
            let mut state = self.inner.state.lock();
            let bundle = Inner::take(&mut state);
            (bundle, state.next_seq)
        };
        if let Some(bundle) = bundle {
            self.inner.send(bundle).await;
        }

        loop {
            let sent = self.inner.sent.notified();
            tokio::pin!(sent);
            sent.as_mut().enable();
            let waiting = self
                .inner
                .state
                .lock()
                .in_flight
                .first()
                .is_some_and(|seq| *seq < horizon);
            if !waiting {
                return;
            }
            sent.await;
        }
    }

    /// Rejects further records. Pending ones still go out on the next flush.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
    }

    /// Starts the task that sends bundles whose oldest record has waited
    /// `delay_threshold`. Stops when `shutdown` flips to true or its sender
    /// is dropped.
    pub fn spawn_delay_timer(
        &self,
        handle: &tokio::runtime::Handle,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let inner = self.inner.clone();
        handle.spawn(async move {
            loop {
                let deadline = inner
                    .state
                    .lock()
                    .opened_at
                    .map(|opened| opened + inner.options.delay_threshold);

                let stop = match deadline {
                    None => tokio::select! {
                        _ = inner.opened.notified() => false,
                        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                    },
                    Some(deadline) => tokio::select! {
                        _ = sleep_until(deadline) => {
                            if let Some(bundle) = inner.take_due(Instant::now()) {
                                inner.send(bundle).await;
                            }
                            false
                        }
                        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                    },
                };

                if stop {
                    break;
                }
            }
            debug!("bundler delay timer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Recorder {
        bundles: Mutex<Vec<Vec<u32>>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl BundleHandler<u32> for Recorder {
        async fn handle(&self, bundle: Vec<u32>) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.bundles.lock().push(bundle);
        }
    }

    fn options(count: usize, delay_ms: u64, limit: usize) -> BundlerOptions {
        BundlerOptions {
            count_threshold: count,
            delay_threshold: Duration::from_millis(delay_ms),
            buffered_limit: limit,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_threshold_sends_one_bundle() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), options(3, 1000, 100));

        for i in 0..3 {
            assert_ok!(bundler.add(i).await);
        }

        assert_eq!(*recorder.bundles.lock(), vec![vec![0, 1, 2]]);
        assert_eq!(bundler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_threshold_sends_partial_bundle() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), options(10, 1000, 100));
        let (_tx, rx) = watch::channel(false);
        let _timer = bundler.spawn_delay_timer(&tokio::runtime::Handle::current(), rx);

        bundler.add(1).await.unwrap();
        bundler.add(2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(recorder.bundles.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*recorder.bundles.lock(), vec![vec![1, 2]]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.bundles.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_counts_from_first_record() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), options(10, 1000, 100));
        let (_tx, rx) = watch::channel(false);
        let _timer = bundler.spawn_delay_timer(&tokio::runtime::Handle::current(), rx);

        bundler.add(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        bundler.add(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*recorder.bundles.lock(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_without_pending_is_noop() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), BundlerOptions::default());

        bundler.flush().await;
        assert!(recorder.bundles.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_pending() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), BundlerOptions::default());

        bundler.add(7).await.unwrap();
        bundler.flush().await;
        assert_eq!(*recorder.bundles.lock(), vec![vec![7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_in_flight_sends() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let bundler = Bundler::new(recorder.clone(), options(1, 1000, 100));

        let producer = bundler.clone();
        let send = tokio::spawn(async move { producer.add(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(recorder.bundles.lock().is_empty());

        bundler.flush().await;
        assert_eq!(*recorder.bundles.lock(), vec![vec![1]]);
        assert_ok!(send.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_ignores_bundles_started_later() {
        let recorder = Arc::new(Recorder {
            delay: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        let bundler = Bundler::new(recorder.clone(), options(1, 1000, 100));
        let started = Instant::now();

        let producer = bundler.clone();
        let first = tokio::spawn(async move { producer.add(1).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let flusher = bundler.clone();
        let flush = tokio::spawn(async move {
            flusher.flush().await;
            Instant::now()
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let producer = bundler.clone();
        let second = tokio::spawn(async move { producer.add(2).await });

        let flushed_at = flush.await.unwrap();
        assert!(flushed_at - started < Duration::from_secs(3));
        assert_eq!(*recorder.bundles.lock(), vec![vec![1]]);

        assert_ok!(first.await.unwrap());
        assert_ok!(second.await.unwrap());
        assert_eq!(*recorder.bundles.lock(), vec![vec![1], vec![2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_rejects_instead_of_blocking() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), options(100, 1000, 2));

        assert_ok!(bundler.add(1).await);
        assert_ok!(bundler.add(2).await);
        let err = assert_err!(bundler.add(3).await);
        assert!(matches!(err, ExporterError::Overflow { limit: 2 }));

        bundler.flush().await;
        assert_ok!(bundler.add(4).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_bundler_rejects() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder.clone(), BundlerOptions::default());
        bundler.close();
        assert!(matches!(bundler.add(1).await, Err(ExporterError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_timer_stops_on_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let bundler = Bundler::new(recorder, BundlerOptions::default());
        let (tx, rx) = watch::channel(false);
        let timer = bundler.spawn_delay_timer(&tokio::runtime::Handle::current(), rx);

        tx.send(true).unwrap();
        timer.await.unwrap();
    }
}
