use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Aggregated duration of one loop stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTiming {
    pub count: usize,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl StageTiming {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Counters and per-stage timing collected by a pipeline controller.
///
/// Timings are aggregated in place so a camera stream that runs for hours
/// does not grow this without bound.
#[derive(Clone, Debug)]
pub struct RunStats {
    started_at: Instant,
    frames: usize,
    empty_polls: usize,
    faces: usize,
    detection_failures: usize,
    stages: BTreeMap<&'static str, StageTiming>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames: 0,
            empty_polls: 0,
            faces: 0,
            detection_failures: 0,
            stages: BTreeMap::new(),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn empty_polls(&self) -> usize {
        self.empty_polls
    }

    pub fn faces(&self) -> usize {
        self.faces
    }

    pub fn detection_failures(&self) -> usize {
        self.detection_failures
    }

    pub fn stage(&self, name: &str) -> Option<StageTiming> {
        self.stages.get(name).copied()
    }

    pub(crate) fn record_frame(&mut self) {
        self.frames += 1;
    }

    pub(crate) fn record_empty_poll(&mut self) {
        self.empty_polls += 1;
    }

    pub(crate) fn record_detection(&mut self, faces: usize, failed: bool) {
        self.faces += faces;
        if failed {
            self.detection_failures += 1;
        }
    }

    pub(crate) fn timing(&mut self, stage: &'static str, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        let entry = self.stages.entry(stage).or_default();
        entry.count += 1;
        entry.total_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
    }

    /// Human-readable report, or `None` before the first frame.
    pub fn summary_string(&self) -> Option<String> {
        if self.frames == 0 {
            return None;
        }

        let elapsed_s = self.started_at.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Pipeline summary ({} frames, {} faces, {} detection failures, {:.1}s):",
            self.frames, self.faces, self.detection_failures, elapsed_s
        )];

        for (stage, timing) in &self.stages {
            lines.push(format!(
                "  {stage:8}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                timing.avg_ms(),
                timing.max_ms,
                timing.total_ms
            ));
        }

        if self.empty_polls > 0 {
            lines.push(format!("  Empty polls: {}", self.empty_polls));
        }
        if elapsed_s > 0.0 {
            lines.push(format!("  Throughput: {:.1} fps", self.frames as f64 / elapsed_s));
        }

        Some(lines.join("\n"))
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}
