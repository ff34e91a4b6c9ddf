//! Mock engine and sink shared by the unit tests

use echoscan_core::{IqSample, RawIqFrame, ScanSequence};
use echoscan_sim::{
    BeamProfile, ExcitationSignal, FixedScatterers, SimError, SimResult, SimulationEngine,
    SplineScatterers,
};
use std::sync::{Arc, Mutex};

use crate::error::{SessionError, SessionResult};
use crate::pipeline::TaskSink;
use crate::task::WorkTask;

/// What the mock engine saw, readable after the engine is boxed
#[derive(Debug, Default)]
pub struct MockLog {
    /// Timestamps of each installed sequence, in installation order
    pub sequences: Vec<Vec<f64>>,
    /// First timestamp of the sequence each simulate call fired
    pub simulated_at: Vec<f64>,
    pub parameters: Vec<(String, String)>,
    pub fixed: usize,
    pub spline: usize,
    pub excitation: bool,
    pub beam_kind: Option<&'static str>,
    /// Reject the next `set_scan_sequence` call
    pub fail_next_install: bool,
}

pub struct MockEngine {
    pub log: Arc<Mutex<MockLog>>,
    /// 1-based simulate call that fails
    pub fail_on_call: Option<usize>,
    pub num_samples: usize,
    calls: usize,
    current: Option<ScanSequence>,
    fixed: usize,
    spline: usize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            fail_on_call: None,
            num_samples: 8,
            calls: 0,
            current: None,
            fixed: 0,
            spline: 0,
        }
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::new()
        }
    }
}

impl SimulationEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn set_scan_sequence(&mut self, sequence: &ScanSequence) -> SimResult<()> {
        let mut log = self.log.lock().unwrap();
        if std::mem::take(&mut log.fail_next_install) {
            return Err(SimError::Simulation("injected install failure".to_string()));
        }
        log.sequences.push(sequence.timestamps());
        drop(log);
        self.current = Some(sequence.clone());
        Ok(())
    }

    fn simulate_lines(&mut self) -> SimResult<RawIqFrame> {
        self.calls += 1;
        if self.fail_on_call == Some(self.calls) {
            return Err(SimError::Simulation(format!("injected failure on call {}", self.calls)));
        }
        let seq = self.current.as_ref().ok_or(SimError::NoScanSequence)?;
        let t0 = seq.lines()[0].timestamp;
        self.log.lock().unwrap().simulated_at.push(t0);
        // phase advances with the line timestamp so packets differ
        let lines = (0..seq.num_lines())
            .map(|l| {
                (0..self.num_samples)
                    .map(|s| {
                        let mag = 1.0 + (l * self.num_samples + s) as f32;
                        IqSample::from_polar(mag, (t0 * 2000.0) as f32)
                    })
                    .collect()
            })
            .collect();
        Ok(RawIqFrame::from_lines(lines).unwrap())
    }

    fn total_num_scatterers(&self) -> usize {
        self.fixed + self.spline
    }

    fn set_parameter(&mut self, key: &str, value: &str) -> SimResult<()> {
        if key == "bogus" {
            return Err(SimError::UnknownParameter(key.to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .parameters
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn clear_fixed_scatterers(&mut self) {
        self.fixed = 0;
        self.log.lock().unwrap().fixed = 0;
    }

    fn clear_spline_scatterers(&mut self) {
        self.spline = 0;
        self.log.lock().unwrap().spline = 0;
    }

    fn add_fixed_scatterers(&mut self, scatterers: Arc<FixedScatterers>) -> SimResult<()> {
        self.fixed += scatterers.len();
        self.log.lock().unwrap().fixed = self.fixed;
        Ok(())
    }

    fn add_spline_scatterers(&mut self, scatterers: Arc<SplineScatterers>) -> SimResult<()> {
        self.spline += scatterers.len();
        self.log.lock().unwrap().spline = self.spline;
        Ok(())
    }

    fn set_excitation(&mut self, _excitation: ExcitationSignal) -> SimResult<()> {
        self.log.lock().unwrap().excitation = true;
        Ok(())
    }

    fn set_beam_profile(&mut self, profile: BeamProfile) -> SimResult<()> {
        self.log.lock().unwrap().beam_kind = Some(profile.kind());
        Ok(())
    }
}

/// Sink that keeps every submitted task
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub tasks: Arc<Mutex<Vec<WorkTask>>>,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl TaskSink for RecordingSink {
    fn submit(&self, task: WorkTask) -> SessionResult<u64> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(task);
        Ok(tasks.len() as u64 - 1)
    }
}

/// Sink whose pipeline has already shut down
pub struct ClosedSink;

impl TaskSink for ClosedSink {
    fn submit(&self, _task: WorkTask) -> SessionResult<u64> {
        Err(SessionError::PipelineClosed)
    }
}
