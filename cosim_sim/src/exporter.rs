//! JSON exporter for run traces.
//!
//! Flattens a [`ScenarioResult`] into time-ordered frames so a run can be
//! inspected or plotted offline.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use cosim_env::SimTime;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::runner::{ParticipantReport, ScenarioMetrics, ScenarioResult};

/// Everything that happened at one simulation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Coupling variables at this time
    pub values: Vec<ValueSample>,

    /// Messages, reconfigurations and observations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// A participant's coupling variable at one time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueSample {
    pub participant: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub participant: String,
    pub message: String,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize)]
pub struct RunExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Last frame time in seconds
    pub duration_sec: f64,

    /// All frames, in time order
    pub frames: Vec<TraceFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl RunExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: None,
        }
    }

    /// Builds the export for a finished run.
    pub fn from_result(result: &ScenarioResult) -> Self {
        let mut frames: BTreeMap<SimTime, TraceFrame> = BTreeMap::new();

        for report in &result.participants {
            let participant = report.participant().to_string();
            let event = |message: String| SimEvent {
                participant: participant.clone(),
                message,
            };
            match report {
                ParticipantReport::Coupling(r) => {
                    for record in &r.instants {
                        frame_at(&mut frames, record.time).values.push(ValueSample {
                            participant: participant.clone(),
                            value: record.x,
                            iterations: Some(record.iterations),
                            converged: Some(record.converged),
                        });
                        if record.forced {
                            frame_at(&mut frames, record.time)
                                .events
                                .push(event("iteration cap reached".to_string()));
                        }
                    }
                }
                ParticipantReport::Loose(r) => {
                    for publication in &r.publications {
                        frame_at(&mut frames, publication.time).values.push(ValueSample {
                            participant: participant.clone(),
                            value: publication.value,
                            iterations: None,
                            converged: None,
                        });
                    }
                    for observation in &r.observations {
                        frame_at(&mut frames, observation.observed_at)
                            .events
                            .push(event(format!("observed {}", observation.value)));
                    }
                }
                ParticipantReport::Messages(r) => {
                    for received in &r.received {
                        let m = &received.message;
                        frame_at(&mut frames, received.granted_at).events.push(event(format!(
                            "received #{} from {} sent at {}",
                            m.id, m.original_source, m.send_time
                        )));
                    }
                }
                ParticipantReport::Filter(r) => {
                    for applied in &r.applied {
                        frame_at(&mut frames, applied.time)
                            .events
                            .push(event(format!("filter set to {}", applied.spec.type_name())));
                    }
                }
            }
        }

        let mut export = Self::new(result.scenario.name(), result.seed);
        for (_, frame) in frames {
            export.add_frame(frame);
        }
        export.finalize(result.passed, result.failure_reason.clone(), Some(result.metrics.clone()));
        export
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: TraceFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, metrics: Option<ScenarioMetrics>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.metrics = metrics;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

fn frame_at(frames: &mut BTreeMap<SimTime, TraceFrame>, time: SimTime) -> &mut TraceFrame {
    frames.entry(time).or_insert_with(|| TraceFrame {
        time_sec: time.as_secs_f64(),
        values: Vec::new(),
        events: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_frames_are_time_ordered() {
        let result = ScenarioRunner::new(42).run(ScenarioId::FilterReconfig);
        let export = RunExport::from_result(&result);

        assert_eq!(export.scenario, "filter_reconfig");
        assert_eq!(export.passed, result.passed);
        assert!(!export.frames.is_empty());
        assert!(export
            .frames
            .windows(2)
            .all(|w| w[0].time_sec < w[1].time_sec));
    }

    #[test]
    fn test_export_coupling_values() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Nonlinear);
        let export = RunExport::from_result(&result);

        // One frame per instant, one value per participant
        assert_eq!(export.frames.len(), 3);
        assert!(export.frames.iter().all(|f| f.values.len() == 2));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["scenario"], "nonlinear");
        assert!(json["frames"][0]["values"][0]["converged"].as_bool().unwrap());
    }
}
