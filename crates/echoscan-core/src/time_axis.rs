//! Simulation time axis
//!
//! [`TimeAxis`] owns the current simulation time, its `[min, max]` range and
//! the step used by [`TimeAxis::advance`]. Every mutation that changes a
//! stored value is reported to the attached observers; a mutation that
//! leaves the value unchanged is silent.
//!
//! ```rust
//! use echoscan_core::time_axis::{TimeAxis, TimeEvent};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let mut axis = TimeAxis::new(0.0, 1.0, 0.01)
//!     .with_observer(move |ev: TimeEvent| sink.lock().unwrap().push(ev));
//!
//! axis.set_time(2.0);
//! assert_eq!(axis.current(), 1.0);
//! assert_eq!(seen.lock().unwrap().as_slice(), &[TimeEvent::TimeChanged(1.0)]);
//! ```

use std::fmt;

/// Smallest accepted time step (seconds)
pub const MIN_TIME_STEP: f64 = 1e-9;

/// Change notification raised by [`TimeAxis`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeEvent {
    MinChanged(f64),
    MaxChanged(f64),
    TimeChanged(f64),
}

/// Receiver of time axis notifications
pub trait TimeObserver: Send {
    fn notify(&mut self, event: TimeEvent);
}

impl<F> TimeObserver for F
where
    F: FnMut(TimeEvent) + Send,
{
    fn notify(&mut self, event: TimeEvent) {
        self(event)
    }
}

/// Current simulation time with a bounded range and a fixed step
pub struct TimeAxis {
    current: f64,
    min: f64,
    max: f64,
    step: f64,
    observers: Vec<Box<dyn TimeObserver>>,
}

impl fmt::Debug for TimeAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeAxis")
            .field("current", &self.current)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for TimeAxis {
    fn default() -> Self {
        Self::new(0.0, 1.0, 1e-3)
    }
}

impl TimeAxis {
    /// Create an axis at `min`. Bounds are swapped if given out of order and
    /// non-finite arguments fall back to `[0, 1]` with a 1 ms step.
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        let (min, max) = if min.is_finite() && max.is_finite() {
            if min <= max { (min, max) } else { (max, min) }
        } else {
            (0.0, 1.0)
        };
        let step = if step.is_finite() { step.max(MIN_TIME_STEP) } else { 1e-3 };
        Self {
            current: min,
            min,
            max,
            step,
            observers: Vec::new(),
        }
    }

    /// Attach an observer.
    pub fn with_observer(mut self, observer: impl TimeObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn num_observers(&self) -> usize {
        self.observers.len()
    }

    fn emit(&mut self, event: TimeEvent) {
        for observer in self.observers.iter_mut() {
            observer.notify(event);
        }
    }

    fn store_current(&mut self, t: f64) {
        let clamped = t.clamp(self.min, self.max);
        if clamped != self.current {
            self.current = clamped;
            self.emit(TimeEvent::TimeChanged(clamped));
        }
    }

    /// Set the current time, clamped into `[min, max]`.
    pub fn set_time(&mut self, t: f64) {
        if !t.is_finite() {
            return;
        }
        self.store_current(t);
    }

    /// Set the lower bound. A bound above `max` drags `max` along.
    pub fn set_min(&mut self, t: f64) {
        if !t.is_finite() {
            return;
        }
        if t != self.min {
            self.min = t;
            self.emit(TimeEvent::MinChanged(t));
        }
        if self.max < self.min {
            self.max = self.min;
            self.emit(TimeEvent::MaxChanged(self.max));
        }
        self.store_current(self.current);
    }

    /// Set the upper bound. A bound below `min` drags `min` along.
    pub fn set_max(&mut self, t: f64) {
        if !t.is_finite() {
            return;
        }
        if t != self.max {
            self.max = t;
            self.emit(TimeEvent::MaxChanged(t));
        }
        if self.min > self.max {
            self.min = self.max;
            self.emit(TimeEvent::MinChanged(self.min));
        }
        self.store_current(self.current);
    }

    /// Set the step used by `advance`, clamped to a positive minimum.
    pub fn set_step(&mut self, dt: f64) {
        if !dt.is_finite() {
            return;
        }
        self.step = dt.max(MIN_TIME_STEP);
    }

    /// Step forward, saturating at `max`.
    pub fn advance(&mut self) {
        let next = (self.current + self.step).min(self.max);
        self.store_current(next);
    }

    /// Jump back to `min`.
    pub fn reset(&mut self) {
        let min = self.min;
        self.store_current(min);
    }
}
