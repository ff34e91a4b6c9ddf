//! Timer-driven acquisition loop
//!
//! Each tick advances the time axis by one step and runs a full request. A
//! failed tick is logged and counted; the loop keeps going.

use echoscan_core::config::PlaybackConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::controller::SessionController;

/// Outcome of a playback run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackSummary {
    pub ticks: u64,
    pub failures: u64,
}

pub struct PlaybackLoop {
    interval: Duration,
    max_ticks: Option<u64>,
    stop_at_end: bool,
    stop: Arc<AtomicBool>,
}

impl PlaybackLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_ticks: None,
            stop_at_end: true,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(Duration::from_millis(config.interval_ms))
            .with_max_ticks(config.max_ticks)
            .with_stop_at_end(config.stop_at_end)
    }

    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Stop once the time axis has reached its maximum.
    pub fn with_stop_at_end(mut self, stop_at_end: bool) -> Self {
        self.stop_at_end = stop_at_end;
        self
    }

    /// Flag that ends the loop; checked between ticks only.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn run(&self, controller: &mut SessionController) -> PlaybackSummary {
        let mut summary = PlaybackSummary::default();
        info!(
            interval_ms = self.interval.as_millis() as u64,
            max_ticks = ?self.max_ticks,
            "Playback started"
        );

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("Playback stop requested");
                break;
            }
            if self.max_ticks.is_some_and(|max| summary.ticks >= max) {
                break;
            }
            let axis = controller.time_axis();
            if self.stop_at_end && summary.ticks > 0 && axis.current() >= axis.max() {
                debug!(time = axis.current(), "End of time axis reached");
                break;
            }

            let started = Instant::now();
            summary.ticks += 1;
            if let Err(e) = controller.tick() {
                summary.failures += 1;
                warn!(error = %e, tick = summary.ticks, "Playback tick failed");
            }

            if let Some(rest) = self.interval.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        info!(ticks = summary.ticks, failures = summary.failures, "Playback finished");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngine, RecordingSink};
    use echoscan_core::SessionConfig;

    fn controller(engine: MockEngine, max_time: f64) -> (SessionController, RecordingSink) {
        let mut config = SessionConfig::default();
        config.scan.num_lines = 2;
        config.time.max = max_time;
        config.time.step = 0.25;
        let sink = RecordingSink::default();
        (SessionController::new(Box::new(engine), Box::new(sink.clone()), &config), sink)
    }

    #[test]
    fn test_max_ticks() {
        let (mut ctl, sink) = controller(MockEngine::new(), 100.0);
        let summary = PlaybackLoop::new(Duration::ZERO)
            .with_max_ticks(Some(3))
            .run(&mut ctl);
        assert_eq!(summary, PlaybackSummary { ticks: 3, failures: 0 });
        assert_eq!(sink.len(), 3);
        assert_eq!(ctl.time_axis().current(), 0.75);
    }

    #[test]
    fn test_stops_at_end_of_axis() {
        let (mut ctl, _sink) = controller(MockEngine::new(), 1.0);
        let summary = PlaybackLoop::new(Duration::ZERO).run(&mut ctl);
        // 0.25, 0.5, 0.75, 1.0
        assert_eq!(summary.ticks, 4);
    }

    #[test]
    fn test_failures_counted_and_loop_continues() {
        let (mut ctl, sink) = controller(MockEngine::failing_on(2), 100.0);
        let summary = PlaybackLoop::new(Duration::ZERO)
            .with_max_ticks(Some(4))
            .run(&mut ctl);
        assert_eq!(summary, PlaybackSummary { ticks: 4, failures: 1 });
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_stop_flag_checked_before_tick() {
        let (mut ctl, sink) = controller(MockEngine::new(), 100.0);
        let playback = PlaybackLoop::new(Duration::ZERO).with_stop_at_end(false);
        playback.stop_handle().store(true, Ordering::Release);
        assert_eq!(playback.run(&mut ctl).ticks, 0);
        assert_eq!(sink.len(), 0);
    }
}
