//! CSV and JSON export of scenario runs, for external diagnostics.

use std::fs::File;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::runner::{FrameRecord, ScenarioResult};

/// Full export of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub frames: Vec<FrameRecord>,
}

impl SimExport {
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            frames: result.frames.clone(),
        }
    }

    /// Writes a pretty-printed JSON export to `path`.
    pub fn write_json(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())
    }
}

/// Writes the bare per-frame `x,y,width,height` trajectory as CSV.
pub fn write_csv(frames: &[FrameRecord], path: &str) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "frame,is_tracking,x,y,width,height")?;
    for r in frames {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            r.frame, r.is_tracking, r.x, r.y, r.width, r.height
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::ScenarioId;

    fn sample_result() -> ScenarioResult {
        ScenarioResult {
            scenario: ScenarioId::Stationary,
            seed: 1,
            passed: true,
            failure_reason: None,
            frames: vec![FrameRecord {
                frame: 0,
                is_tracking: true,
                x: 1.0,
                y: 2.0,
                width: 40.0,
                height: 40.0,
            }],
        }
    }

    #[test]
    fn export_serializes_without_failure_reason() {
        let export = SimExport::from_result(&sample_result());
        let json = serde_json::to_string(&export).unwrap();
        assert!(!json.contains("failure_reason"));
    }
}
