// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching of signals before they are reported.
//!
//! A [`BatchCollector`] queues signals and hands them to a [`BatchReporter`]
//! in batches. A batch is dispatched when the queue reaches the trigger size,
//! or when the flush timer fires, whichever happens first. At most
//! `max_concurrent_requests` batches are in flight at once, and the queue
//! never holds more than `max_queue_size` signals: when it is full and no
//! submission slot is free, new signals are dropped.
//!
//! Background submissions only log their failures. [`BatchCollector::force_report`]
//! is the one path where the caller sees the delivery outcome.
//!
//! `close()` must be called before the collector is dropped for in-flight
//! submissions to be awaited; dropping it only cancels the flush timer.

use crate::client::BatchReporter;
use crate::config::CollectorConfig;
use crate::errors;
use crate::signals::Signal;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

pub struct BatchCollector {
    inner: Arc<Inner>,
}

struct Inner {
    trigger_size: usize,
    max_queue_size: usize,
    max_concurrent_requests: usize,
    max_delay: Duration,
    reporter: Arc<dyn BatchReporter>,
    queue: Mutex<Vec<Signal>>,
    active_batches: Arc<AtomicUsize>,
    timer: Mutex<FlushTimer>,
    tasks: TaskTracker,
    runtime: Handle,
    closed: AtomicBool,
}

#[derive(Default)]
struct FlushTimer {
    current: Option<ScheduledFlush>,
    generation: u64,
}

struct ScheduledFlush {
    handle: JoinHandle<()>,
    deadline: Instant,
    generation: u64,
}

/// A reserved submission slot, released on drop.
struct ActiveBatch(Arc<AtomicUsize>);

impl ActiveBatch {
    fn reserve(counter: &Arc<AtomicUsize>, ceiling: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < ceiling).then_some(active + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for ActiveBatch {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl BatchCollector {
    /// Creates a collector running its timer and submissions on the current
    /// tokio runtime.
    pub fn new(
        config: CollectorConfig,
        reporter: Arc<dyn BatchReporter>,
    ) -> Result<Self, errors::Config> {
        let runtime = Handle::try_current().map_err(|_| errors::Config::NoRuntime)?;
        Self::with_runtime(config, reporter, runtime)
    }

    pub fn with_runtime(
        config: CollectorConfig,
        reporter: Arc<dyn BatchReporter>,
        runtime: Handle,
    ) -> Result<Self, errors::Config> {
        config.validate()?;
        let inner = Arc::new(Inner {
            trigger_size: config.trigger_size,
            max_queue_size: config.effective_max_queue_size(),
            max_concurrent_requests: config.max_concurrent_requests,
            max_delay: config.max_delay,
            reporter,
            queue: Mutex::new(Vec::new()),
            active_batches: Arc::new(AtomicUsize::new(0)),
            timer: Mutex::new(FlushTimer::default()),
            tasks: TaskTracker::new(),
            runtime,
            closed: AtomicBool::new(false),
        });
        inner.reschedule();
        Ok(Self { inner })
    }

    /// Queues `signal`, dispatching a batch if the trigger size is reached.
    ///
    /// Returns `Ok(false)` when the queue is full and no batch could be
    /// dispatched to make room; the signal is dropped. Fails only once the
    /// collector is closed.
    pub fn add(&self, signal: Signal) -> Result<bool, errors::Collector> {
        if self.inner.is_closed() {
            return Err(errors::Collector::Closed);
        }

        let signal = match self.inner.offer(signal) {
            Ok(len) => {
                self.inner.maybe_trigger(len);
                return Ok(true);
            }
            Err(signal) => signal,
        };

        debug!("Signal queue is full, attempting a flush to make room");
        self.inner.submit_batch();
        match self.inner.offer(signal) {
            Ok(len) => {
                self.inner.maybe_trigger(len);
                Ok(true)
            }
            Err(_) => {
                debug!(
                    "Signal queue is full ({} signals), dropping signal",
                    self.inner.max_queue_size
                );
                Ok(false)
            }
        }
    }

    /// Reports everything queued right now and waits for the outcome.
    ///
    /// An empty queue performs no request. The flush timer is restarted
    /// either way.
    pub async fn force_report(&self) -> Result<(), errors::Collector> {
        if self.inner.is_closed() {
            return Err(errors::Collector::Closed);
        }
        self.inner.reschedule();

        let batch = self.inner.drain();
        if batch.is_empty() {
            return Ok(());
        }
        debug!("Forcing report of {} signals", batch.len());
        self.inner.reporter.report_batch(&batch).await?;
        Ok(())
    }

    /// Drops every queued signal without reporting it. Returns how many were
    /// dropped.
    pub fn discard(&self) -> usize {
        let discarded = self.inner.drain().len();
        if discarded > 0 {
            info!("Discarded {discarded} queued signals");
        }
        discarded
    }

    /// Stops the flush timer and refuses further work. Submissions already in
    /// flight run to completion; queued signals are not reported.
    pub fn close(&self) -> Result<(), errors::Collector> {
        {
            let mut timer = self.inner.lock_timer();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return Err(errors::Collector::Closed);
            }
            if let Some(scheduled) = timer.current.take() {
                scheduled.handle.abort();
            }
        }
        self.inner.tasks.close();
        debug!(
            "Batch collector closed with {} signals queued and {} batches in flight",
            self.queue_len(),
            self.active_batches()
        );
        Ok(())
    }

    /// Waits up to `timeout` for in-flight submissions to finish after
    /// [`close`](Self::close). Returns whether they all did.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_ok()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.lock_queue().len()
    }

    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.inner.active_batches.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Time left before the pending scheduled flush, `None` once closed.
    #[must_use]
    pub fn delay_till_next_flush(&self) -> Option<Duration> {
        self.inner
            .lock_timer()
            .current
            .as_ref()
            .map(|scheduled| scheduled.deadline.saturating_duration_since(Instant::now()))
    }
}

impl fmt::Debug for BatchCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCollector")
            .field("trigger_size", &self.inner.trigger_size)
            .field("max_queue_size", &self.inner.max_queue_size)
            .field("max_concurrent_requests", &self.inner.max_concurrent_requests)
            .field("max_delay", &self.inner.max_delay)
            .field("queue_len", &self.queue_len())
            .field("active_batches", &self.active_batches())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[allow(clippy::expect_used)]
    fn lock_queue(&self) -> MutexGuard<'_, Vec<Signal>> {
        self.queue.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_timer(&self) -> MutexGuard<'_, FlushTimer> {
        self.timer.lock().expect("lock poisoned")
    }

    /// Appends `signal` unless the queue is full, returning the new length.
    fn offer(&self, signal: Signal) -> Result<usize, Signal> {
        let mut queue = self.lock_queue();
        if queue.len() >= self.max_queue_size {
            return Err(signal);
        }
        queue.push(signal);
        Ok(queue.len())
    }

    fn drain(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.lock_queue())
    }

    fn maybe_trigger(self: &Arc<Self>, len: usize) {
        if len >= self.trigger_size {
            self.submit_batch();
        }
    }

    /// Dispatches the queued signals as one background submission. Returns
    /// whether a batch was dispatched.
    fn submit_batch(self: &Arc<Self>) -> bool {
        let Some(slot) = ActiveBatch::reserve(&self.active_batches, self.max_concurrent_requests)
        else {
            debug!(
                "{} batches already in flight, not flushing",
                self.max_concurrent_requests
            );
            return false;
        };

        let batch = self.drain();
        if batch.is_empty() {
            return false;
        }

        if self.tasks.is_closed() {
            info!(
                "Batch collector is shut down, {} signals were lost",
                batch.len()
            );
            return false;
        }

        debug!("Dispatching batch of {} signals", batch.len());
        let reporter = Arc::clone(&self.reporter);
        self.tasks.spawn_on(
            async move {
                let _slot = slot;
                if let Err(e) = reporter.report_batch(&batch).await {
                    warn!("Batch report failed: {e}");
                }
            }
            .in_current_span(),
            &self.runtime,
        );
        self.reschedule();
        true
    }

    /// Cancels the pending flush and schedules a new one `max_delay` from now.
    fn reschedule(self: &Arc<Self>) {
        let mut timer = self.lock_timer();
        if self.is_closed() {
            return;
        }
        if let Some(previous) = timer.current.take() {
            previous.handle.abort();
        }

        timer.generation = timer.generation.wrapping_add(1);
        let generation = timer.generation;
        let deadline = Instant::now() + self.max_delay;
        let collector = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = collector.upgrade() {
                inner.run_scheduled_flush(generation);
            }
        });
        timer.current = Some(ScheduledFlush {
            handle,
            deadline,
            generation,
        });
    }

    fn run_scheduled_flush(self: &Arc<Self>, generation: u64) {
        {
            let mut timer = self.lock_timer();
            match &timer.current {
                Some(scheduled) if scheduled.generation == generation => timer.current = None,
                // superseded by a newer timer
                _ => return,
            }
        }

        let queued = self.lock_queue().len();
        let dispatched = queued > 0 && self.submit_batch();
        if !dispatched {
            debug!("Scheduled flush did not dispatch ({queued} signals queued), rescheduling");
            self.reschedule();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(timer) = self.timer.get_mut() {
            if let Some(scheduled) = timer.current.take() {
                scheduled.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Ingestion;
    use crate::signals::{Object, SignalBody};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Semaphore;
    use tracing_test::traced_test;

    const DELAY: Duration = Duration::from_millis(1_000);

    #[derive(Default)]
    struct RecordingReporter {
        batches: Mutex<Vec<Vec<String>>>,
        gate: Option<Semaphore>,
        failure: Option<Ingestion>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingReporter {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn failing(error: Ingestion) -> Self {
            Self {
                failure: Some(error),
                ..Self::default()
            }
        }

        fn release(&self, permits: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(permits);
            }
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchReporter for RecordingReporter {
        async fn report_batch(&self, batch: &[Signal]) -> Result<(), Ingestion> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            tokio::task::yield_now().await;
            self.batches.lock().unwrap().push(
                batch
                    .iter()
                    .map(|signal| signal.body().name.clone().unwrap_or_default())
                    .collect(),
            );
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match &self.failure {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }
    }

    fn signal(name: &str) -> Signal {
        Signal::point(SignalBody::named(name, Object::new()))
    }

    fn config(trigger_size: usize, max_queue_size: usize, max_concurrent_requests: usize) -> CollectorConfig {
        CollectorConfig {
            trigger_size,
            max_queue_size: Some(max_queue_size),
            max_concurrent_requests,
            max_delay: DELAY,
        }
    }

    fn collector(config: CollectorConfig, reporter: &Arc<RecordingReporter>) -> BatchCollector {
        let reporter: Arc<dyn BatchReporter> = Arc::clone(reporter) as Arc<dyn BatchReporter>;
        BatchCollector::new(config, reporter).unwrap()
    }

    /// Lets spawned submissions run without reaching the flush deadline.
    async fn settle() {
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn batch(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let reporter: Arc<dyn BatchReporter> = Arc::new(RecordingReporter::default());
        let result = BatchCollector::new(CollectorConfig::default(), reporter);
        assert!(matches!(result, Err(errors::Config::NoRuntime)));
    }

    #[test]
    fn test_with_runtime_from_another_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let collector = BatchCollector::with_runtime(
            config(1, 10, 1),
            Arc::clone(&reporter) as Arc<dyn BatchReporter>,
            runtime.handle().clone(),
        )
        .unwrap();

        assert!(collector.add(signal("a")).unwrap());
        collector.close().unwrap();
        assert!(runtime.block_on(collector.await_termination(Duration::from_secs(5))));
        assert_eq!(reporter.batches(), vec![batch(&["a"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_rejected() {
        let reporter: Arc<dyn BatchReporter> = Arc::new(RecordingReporter::default());
        let result = BatchCollector::new(config(0, 10, 1), reporter);
        assert!(matches!(
            result,
            Err(errors::Config::InvalidValue {
                field: "trigger_size",
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_below_trigger_stays_queued() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(2, 20, 1), &reporter);

        assert!(collector.add(signal("a")).unwrap());
        settle().await;

        assert_eq!(collector.queue_len(), 1);
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_dispatches_in_fifo_order() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(2, 20, 1), &reporter);

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        assert_eq!(collector.queue_len(), 0);
        settle().await;

        assert_eq!(reporter.batches(), vec![batch(&["a", "b"])]);
        assert_eq!(collector.active_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_batch_waits_for_free_slot() {
        let reporter = Arc::new(RecordingReporter::gated());
        let collector = collector(config(2, 20, 1), &reporter);

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        settle().await;
        assert_eq!(collector.active_batches(), 1);

        collector.add(signal("c")).unwrap();
        assert_eq!(collector.queue_len(), 1);
        collector.add(signal("d")).unwrap();
        // no slot left: the attempt is a no-op
        assert_eq!(collector.queue_len(), 2);
        assert_eq!(collector.active_batches(), 1);

        reporter.release(1);
        settle().await;
        assert_eq!(collector.active_batches(), 0);
        assert_eq!(collector.queue_len(), 2);

        // the timer picks up what the trigger could not send
        reporter.release(1);
        tokio::time::sleep(DELAY).await;
        settle().await;
        assert_eq!(
            reporter.batches(),
            vec![batch(&["a", "b"]), batch(&["c", "d"])]
        );
        assert_eq!(collector.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_after_slot_release_dispatches() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(2, 20, 1), &reporter);

        for name in ["a", "b", "c", "d"] {
            collector.add(signal(name)).unwrap();
            settle().await;
        }

        assert_eq!(
            reporter.batches(),
            vec![batch(&["a", "b"]), batch(&["c", "d"])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_exactly_one_signal() {
        let reporter = Arc::new(RecordingReporter::gated());
        let collector = collector(config(5, 5, 1), &reporter);

        for i in 0..5 {
            collector.add(signal(&format!("in-flight-{i}"))).unwrap();
        }
        settle().await;
        assert_eq!(collector.active_batches(), 1);

        let accepted: Vec<bool> = (0..6)
            .map(|i| collector.add(signal(&format!("queued-{i}"))).unwrap())
            .collect();

        assert_eq!(accepted.iter().filter(|accepted| !**accepted).count(), 1);
        assert!(!accepted[5]);
        assert_eq!(collector.queue_len(), 5);
        assert_eq!(collector.active_batches(), 1);
        reporter.release(2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_flushes_to_make_room() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 3, 1), &reporter);

        for name in ["a", "b", "c"] {
            assert!(collector.add(signal(name)).unwrap());
        }
        assert!(collector.add(signal("d")).unwrap());
        assert_eq!(collector.queue_len(), 1);
        settle().await;

        assert_eq!(reporter.batches(), vec![batch(&["a", "b", "c"])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_pending_signals() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        tokio::time::sleep(DELAY - Duration::from_millis(10)).await;
        assert!(reporter.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(reporter.batches(), vec![batch(&["a", "b"])]);
        assert!(collector.delay_till_next_flush().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reschedules_when_queue_is_empty() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);
        assert_eq!(collector.delay_till_next_flush(), Some(DELAY));

        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;

        assert_eq!(
            collector.delay_till_next_flush(),
            Some(DELAY - Duration::from_millis(1))
        );
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_restarts_the_timer() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(2, 20, 1), &reporter);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            collector.delay_till_next_flush(),
            Some(Duration::from_millis(600))
        );

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        assert_eq!(collector.delay_till_next_flush(), Some(DELAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_report_sends_inline() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.add(signal("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        collector.force_report().await.unwrap();

        assert_eq!(reporter.batches(), vec![batch(&["a"])]);
        assert_eq!(collector.queue_len(), 0);
        assert_eq!(collector.delay_till_next_flush(), Some(DELAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_report_with_empty_queue_makes_no_call() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.force_report().await.unwrap();

        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_report_propagates_failure() {
        let error = Ingestion::Authentication {
            status: 403,
            message: "Unexpected response code: 403. Body denied".to_string(),
        };
        let reporter = Arc::new(RecordingReporter::failing(error.clone()));
        let collector = collector(config(10, 100, 1), &reporter);

        collector.add(signal("a")).unwrap();
        let result = collector.force_report().await;

        assert!(matches!(
            result,
            Err(errors::Collector::Ingestion(ref e)) if *e == error
        ));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_background_failure_is_logged_and_releases_slot() {
        let reporter = Arc::new(RecordingReporter::failing(Ingestion::BadStatus {
            status: 500,
            message: "Unexpected response code: 500. Body oops".to_string(),
        }));
        let collector = collector(config(1, 10, 1), &reporter);

        assert!(collector.add(signal("a")).unwrap());
        settle().await;

        assert!(logs_contain("Batch report failed: Unexpected response code: 500"));
        assert_eq!(collector.active_batches(), 0);

        // not retried
        settle().await;
        assert_eq!(reporter.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_drops_queued_signals() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        assert_eq!(collector.discard(), 2);
        collector.force_report().await.unwrap();

        assert_eq!(collector.queue_len(), 0);
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_close_fail() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.close().unwrap();

        assert!(collector.is_closed());
        assert!(matches!(
            collector.add(signal("a")),
            Err(errors::Collector::Closed)
        ));
        assert!(matches!(
            collector.force_report().await,
            Err(errors::Collector::Closed)
        ));
        assert!(matches!(collector.close(), Err(errors::Collector::Closed)));
        assert!(collector.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_timer_without_flushing() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);

        collector.add(signal("a")).unwrap();
        collector.close().unwrap();
        assert_eq!(collector.delay_till_next_flush(), None);

        tokio::time::sleep(DELAY * 3).await;
        settle().await;

        assert!(reporter.batches().is_empty());
        assert_eq!(collector.queue_len(), 1);
        assert_eq!(collector.delay_till_next_flush(), None);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_dispatch_after_shutdown_loses_batch() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(2, 20, 1), &reporter);
        collector.inner.tasks.close();

        collector.add(signal("a")).unwrap();
        collector.add(signal("b")).unwrap();
        settle().await;

        assert!(logs_contain("2 signals were lost"));
        assert_eq!(collector.queue_len(), 0);
        assert_eq!(collector.active_batches(), 0);
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_termination_waits_for_in_flight_batches() {
        let reporter = Arc::new(RecordingReporter::gated());
        let collector = collector(config(1, 10, 1), &reporter);

        collector.add(signal("a")).unwrap();
        settle().await;
        collector.close().unwrap();

        assert!(!collector.await_termination(Duration::from_secs(1)).await);

        reporter.release(1);
        assert!(collector.await_termination(Duration::from_secs(1)).await);
        assert_eq!(reporter.batches(), vec![batch(&["a"])]);
        assert_eq!(collector.active_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_termination_without_close_times_out() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(1, 10, 1), &reporter);

        assert!(!collector.await_termination(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_without_close_releases_reporter() {
        let reporter = Arc::new(RecordingReporter::default());
        let collector = collector(config(10, 100, 1), &reporter);
        collector.add(signal("a")).unwrap();
        assert_eq!(Arc::strong_count(&reporter), 2);

        drop(collector);
        tokio::time::sleep(DELAY * 2).await;

        assert_eq!(Arc::strong_count(&reporter), 1);
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_neither_lose_nor_duplicate() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let reporter = Arc::new(RecordingReporter::default());
        let collector = Arc::new(collector(
            config(10, PRODUCERS * PER_PRODUCER, 2),
            &reporter,
        ));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let collector = Arc::clone(&collector);
                tokio::task::spawn_blocking(move || {
                    (0..PER_PRODUCER).all(|i| {
                        let accepted = collector.add(signal(&format!("{producer}-{i}"))).unwrap();
                        assert!(collector.active_batches() <= 2);
                        accepted
                    })
                })
            })
            .collect();
        for producer in producers {
            assert!(producer.await.unwrap());
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            while collector.active_batches() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(reporter.max_in_flight.load(Ordering::SeqCst) <= 2);

        collector.force_report().await.unwrap();
        collector.close().unwrap();
        assert!(collector.await_termination(Duration::from_secs(5)).await);

        let delivered: Vec<String> = reporter.batches().into_iter().flatten().collect();
        let unique: HashSet<&String> = delivered.iter().collect();
        assert_eq!(delivered.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    }
}
