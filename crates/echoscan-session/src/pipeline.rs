//! Asynchronous image formation pipeline
//!
//! One named worker thread fed by an unbounded channel:
//!
//! ```text
//! control thread                       image-formation thread
//! ──────────────                       ──────────────────────
//! submit(task) ──► mpsc (unbounded) ──► form(task) ──► subscriber.on_*_ready(result)
//!   returns at once                     one task at a time, FIFO
//! ```
//!
//! Submission never blocks. The queue depth is tracked in
//! [`SessionMetrics::queue_depth`]; a warning is logged whenever it exceeds
//! the configured threshold, nothing is ever dropped. Dropping the pipeline
//! closes the channel, lets the worker drain what is queued and joins it.

use echoscan_core::observe::SessionMetrics;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::formation;
use crate::task::{WorkResult, WorkTask};

/// Receives formation results on the worker thread.
///
/// Callbacks run on the pipeline worker, not on the submitting thread, and
/// should return quickly.
pub trait PipelineSubscriber: Send + 'static {
    fn on_bmode_ready(&mut self, result: WorkResult);
    fn on_color_ready(&mut self, result: WorkResult);
}

/// Fan a result out to two subscribers.
impl<A: PipelineSubscriber, B: PipelineSubscriber> PipelineSubscriber for (A, B) {
    fn on_bmode_ready(&mut self, result: WorkResult) {
        self.0.on_bmode_ready(result.clone());
        self.1.on_bmode_ready(result);
    }

    fn on_color_ready(&mut self, result: WorkResult) {
        self.0.on_color_ready(result.clone());
        self.1.on_color_ready(result);
    }
}

/// An absent subscriber discards results.
impl<S: PipelineSubscriber> PipelineSubscriber for Option<S> {
    fn on_bmode_ready(&mut self, result: WorkResult) {
        if let Some(s) = self {
            s.on_bmode_ready(result);
        }
    }

    fn on_color_ready(&mut self, result: WorkResult) {
        if let Some(s) = self {
            s.on_color_ready(result);
        }
    }
}

/// Destination for work tasks.
pub trait TaskSink {
    /// Hand off a task without waiting for it; returns the task id.
    fn submit(&self, task: WorkTask) -> SessionResult<u64>;
}

struct Envelope {
    id: u64,
    task: WorkTask,
}

/// Handle to the formation worker
pub struct ImageFormationPipeline {
    tx: Option<Sender<Envelope>>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    warn_depth: usize,
    metrics: Arc<SessionMetrics>,
}

impl ImageFormationPipeline {
    /// Start the worker thread.
    pub fn spawn(
        subscriber: impl PipelineSubscriber,
        metrics: Arc<SessionMetrics>,
        warn_depth: usize,
    ) -> SessionResult<Self> {
        let (tx, rx) = mpsc::channel();
        let worker_metrics = metrics.clone();
        let handle = thread::Builder::new()
            .name("image-formation".to_string())
            .spawn(move || Self::worker_loop(rx, subscriber, worker_metrics))
            .map_err(|e| SessionError::Io(format!("failed to spawn formation thread: {}", e)))?;

        info!(warn_depth, "Image formation pipeline started");
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            next_id: AtomicU64::new(0),
            warn_depth,
            metrics,
        })
    }

    fn worker_loop(rx: Receiver<Envelope>, mut subscriber: impl PipelineSubscriber, metrics: Arc<SessionMetrics>) {
        for Envelope { id, task } in rx {
            let start = Instant::now();
            let result = formation::form(&task, id);
            let elapsed_ms = start.elapsed().as_secs_f64() * 1e3;
            metrics.formation_latency_ms.observe(elapsed_ms);
            debug!(task_id = id, kind = task.kind(), elapsed_ms, "Task formed");

            match result {
                WorkResult::BModeImage(_) => subscriber.on_bmode_ready(result),
                WorkResult::ColorImage(_) => subscriber.on_color_ready(result),
            }
            metrics.results_delivered.inc();
            metrics.queue_depth.dec();
        }
        debug!("Image formation worker exiting");
    }

    /// Tasks submitted but not yet delivered
    pub fn queue_depth(&self) -> i64 {
        self.metrics.queue_depth.get()
    }

    /// Close the queue, finish every pending task and join the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Image formation worker panicked");
            }
        }
    }
}

impl TaskSink for ImageFormationPipeline {
    fn submit(&self, task: WorkTask) -> SessionResult<u64> {
        let tx = self.tx.as_ref().ok_or(SessionError::PipelineClosed)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = task.kind();

        let depth = self.metrics.queue_depth.inc();
        if tx.send(Envelope { id, task }).is_err() {
            self.metrics.queue_depth.dec();
            return Err(SessionError::PipelineClosed);
        }
        self.metrics.tasks_submitted.inc();

        if depth > self.warn_depth as i64 {
            warn!(depth, threshold = self.warn_depth, "Image formation is falling behind");
        }
        debug!(task_id = id, kind, depth, "Task submitted");
        Ok(id)
    }
}

impl Drop for ImageFormationPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Subscriber that forwards results into a channel
pub struct ChannelSubscriber {
    tx: Sender<WorkResult>,
}

impl PipelineSubscriber for ChannelSubscriber {
    fn on_bmode_ready(&mut self, result: WorkResult) {
        let _ = self.tx.send(result);
    }

    fn on_color_ready(&mut self, result: WorkResult) {
        let _ = self.tx.send(result);
    }
}

/// Receiving end of a [`ChannelSubscriber`]
pub struct ResultReceiver {
    rx: Receiver<WorkResult>,
}

impl ResultReceiver {
    /// All results delivered so far (non-blocking).
    pub fn poll(&self) -> Vec<WorkResult> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(result) => out.push(result),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Wait up to `timeout` for the next result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Connected subscriber / receiver pair.
pub fn result_channel() -> (ChannelSubscriber, ResultReceiver) {
    let (tx, rx) = mpsc::channel();
    (ChannelSubscriber { tx }, ResultReceiver { rx })
}

/// Shared normalization constant for closed-loop auto-gain.
///
/// Written on the worker thread, read on the control thread.
#[derive(Debug, Clone)]
pub struct NormalizationFeedback {
    bits: Arc<AtomicU32>,
}

impl NormalizationFeedback {
    pub fn new(initial: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(initial.to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// Wraps a subscriber and records updated normalization constants.
pub struct FeedbackSubscriber<S> {
    inner: S,
    feedback: NormalizationFeedback,
}

impl<S: PipelineSubscriber> FeedbackSubscriber<S> {
    pub fn new(inner: S, feedback: NormalizationFeedback) -> Self {
        Self { inner, feedback }
    }
}

impl<S: PipelineSubscriber> PipelineSubscriber for FeedbackSubscriber<S> {
    fn on_bmode_ready(&mut self, result: WorkResult) {
        if let WorkResult::BModeImage(ref img) = result {
            if let Some(c) = img.updated_normalization_const {
                self.feedback.set(c);
            }
        }
        self.inner.on_bmode_ready(result);
    }

    fn on_color_ready(&mut self, result: WorkResult) {
        self.inner.on_color_ready(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BModeParams, BModeTask, ColorParams, ColorTask};
    use echoscan_core::{IqSample, RawIqFrame, ScanGeometry};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn geometry() -> ScanGeometry {
        ScanGeometry::Linear { width: 0.01, range_max: 0.01 }
    }

    fn bmode(amplitude: f32, sim_time: f64) -> WorkTask {
        WorkTask::BMode(BModeTask {
            geometry: geometry(),
            frame: RawIqFrame::from_lines(vec![vec![IqSample::new(amplitude, 0.0); 8]; 4]).unwrap(),
            params: BModeParams { dots_per_meter: 2000.0, ..Default::default() },
            sim_time,
        })
    }

    fn color(sim_time: f64) -> WorkTask {
        WorkTask::ColorDoppler(ColorTask {
            geometry: geometry(),
            frames: vec![RawIqFrame::zeros(4, 8); 3],
            params: ColorParams { dots_per_meter: 2000.0, ..Default::default() },
            sim_time,
        })
    }

    #[test]
    fn test_one_result_per_task_in_order() {
        let metrics = Arc::new(SessionMetrics::new());
        let (sub, results) = result_channel();
        let pipeline = ImageFormationPipeline::spawn(sub, metrics.clone(), 10).unwrap();

        let mut ids = Vec::new();
        for i in 0..6 {
            let task = if i % 3 == 2 { color(i as f64) } else { bmode(1.0, i as f64) };
            ids.push(pipeline.submit(task).unwrap());
        }
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        pipeline.shutdown();

        let delivered = results.poll();
        assert_eq!(delivered.len(), 6);
        let order: Vec<u64> = delivered.iter().map(|r| r.task_id()).collect();
        assert_eq!(order, ids);
        assert!(matches!(delivered[2], WorkResult::ColorImage(_)));

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_submitted, 6);
        assert_eq!(snap.results_delivered, 6);
        assert_eq!(snap.queue_depth, 0);
        assert_eq!(snap.formation_count, 6);
    }

    #[test]
    fn test_results_arrive_asynchronously() {
        let (sub, results) = result_channel();
        let pipeline = ImageFormationPipeline::spawn(sub, Arc::new(SessionMetrics::new()), 10).unwrap();
        pipeline.submit(bmode(1.0, 0.5)).unwrap();
        let result = results.recv_timeout(TIMEOUT).unwrap();
        match result {
            WorkResult::BModeImage(img) => {
                assert_eq!(img.sim_time, 0.5);
                assert_eq!(img.image.dimensions(), (20, 20));
            }
            other => panic!("unexpected result {:?}", other.task_id()),
        }
    }

    #[test]
    fn test_feedback_records_normalization() {
        let feedback = NormalizationFeedback::new(1.0);
        let (sub, results) = result_channel();
        let pipeline = ImageFormationPipeline::spawn(
            FeedbackSubscriber::new(sub, feedback.clone()),
            Arc::new(SessionMetrics::new()),
            10,
        )
        .unwrap();
        pipeline.submit(bmode(4.0, 0.0)).unwrap();
        assert!(results.recv_timeout(TIMEOUT).is_some());
        assert_eq!(feedback.get(), 4.0);
    }

    #[test]
    fn test_fan_out_subscribers() {
        let (a, ra) = result_channel();
        let (b, rb) = result_channel();
        let pipeline = ImageFormationPipeline::spawn((a, b), Arc::new(SessionMetrics::new()), 10).unwrap();
        pipeline.submit(color(0.0)).unwrap();
        pipeline.shutdown();
        assert_eq!(ra.poll().len(), 1);
        assert_eq!(rb.poll().len(), 1);
    }

    #[test]
    fn test_backlog_is_queued_not_dropped() {
        let metrics = Arc::new(SessionMetrics::new());
        let (sub, results) = result_channel();
        let pipeline = ImageFormationPipeline::spawn(sub, metrics.clone(), 1).unwrap();
        for i in 0..20 {
            pipeline.submit(bmode(1.0, i as f64)).unwrap();
        }
        drop(pipeline);
        assert_eq!(results.poll().len(), 20);
        assert_eq!(metrics.queue_depth.get(), 0);
    }
}
