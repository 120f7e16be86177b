use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone)]
pub struct StepTiming {
    pub name: String,
    pub duration: Duration,
    pub calls: u64,
}

/// Accumulated wall time per conversion step, in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct PipelineTimings {
    steps: Vec<StepTiming>,
    index: HashMap<String, usize>,
}

impl PipelineTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, name: impl Into<String>, duration: Duration) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => {
                self.steps[i].duration += duration;
                self.steps[i].calls += 1;
            }
            None => {
                self.index.insert(name.clone(), self.steps.len());
                self.steps.push(StepTiming {
                    name,
                    duration,
                    calls: 1,
                });
            }
        }
    }

    pub fn record(&mut self, timer: Timer) {
        let (name, duration) = timer.stop();
        self.add_step(name, duration);
    }

    pub fn total_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.duration).sum()
    }

    pub fn get_step(&self, name: &str) -> Option<Duration> {
        self.index.get(name).map(|&i| self.steps[i].duration)
    }

    pub fn steps(&self) -> &[StepTiming] {
        &self.steps
    }

    pub fn log_summary(&self) {
        let total = self.total_duration();
        for step in &self.steps {
            let percentage = if total.as_secs_f64() > 0.0 {
                (step.duration.as_secs_f64() / total.as_secs_f64()) * 100.0
            } else {
                0.0
            };
            debug!(
                step = %step.name,
                calls = step.calls,
                ms = step.duration.as_secs_f64() * 1000.0,
                "{:.1}% of conversion time",
                percentage
            );
        }
        debug!(ms = total.as_secs_f64() * 1000.0, "Total timed work");
    }
}

pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    pub fn stop(self) -> (&'static str, Duration) {
        (self.name, self.start.elapsed())
    }
}
