//! Experiment configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, NucleusResult};
use crate::ids::ScenarioId;

/// Settings of one experiment run.
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentParameters {
    /// Worker threads. Zero runs every scenario on the calling thread.
    pub thread_count: usize,
    /// Collect plugin data from every data manager at halt.
    pub record_state: bool,
    /// Halt time applied to every scenario without its own.
    pub simulation_halt_time: Option<f64>,
    /// Per-scenario halt times, overriding `simulation_halt_time`.
    pub scenario_halt_times: BTreeMap<ScenarioId, f64>,
    /// Stop starting scenarios after the first failure and fail the run.
    pub halt_on_exception: bool,
    /// Root of every scenario's random seed.
    pub master_seed: u64,
    /// JSON-lines file recording each succeeded scenario.
    pub progress_log: Option<PathBuf>,
    /// Skip scenarios the progress log records as succeeded.
    pub continue_from_progress_log: bool,
    /// Run only these scenarios. `None` runs all of them.
    pub scenario_ids: Option<BTreeSet<ScenarioId>>,
}

impl Default for ExperimentParameters {
    fn default() -> Self {
        Self {
            thread_count: 0,
            record_state: false,
            simulation_halt_time: None,
            scenario_halt_times: BTreeMap::new(),
            halt_on_exception: false,
            master_seed: 0,
            progress_log: None,
            continue_from_progress_log: false,
            scenario_ids: None,
        }
    }
}

impl ExperimentParameters {
    /// Parses parameters from JSON.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if the text is not valid parameters JSON or fails
    /// [`Self::validate`].
    pub fn from_json_str(json: &str) -> NucleusResult<Self> {
        let parameters: Self = serde_json::from_str(json)
            .map_err(|e| ContractError::incompatible("experiment parameters", "valid parameters JSON", e))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Loads parameters from a JSON file.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> NucleusResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ContractError::incompatible("experiment parameters file", path.display().to_string(), e)
        })?;
        Self::from_json_str(&json)
    }

    /// Halt time for one scenario.
    #[must_use]
    pub fn halt_time_for(&self, scenario_id: ScenarioId) -> Option<f64> {
        self.scenario_halt_times
            .get(&scenario_id)
            .copied()
            .or(self.simulation_halt_time)
    }

    /// Returns true if the scenario is selected to run.
    #[must_use]
    pub fn includes(&self, scenario_id: ScenarioId) -> bool {
        self.scenario_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&scenario_id))
    }

    /// Checks the parameters for internal consistency.
    ///
    /// # Errors
    ///
    /// `IncompatibleValue` for a non-finite halt time, or for continuing from
    /// a progress log that is not configured.
    pub fn validate(&self) -> Result<(), ContractError> {
        if let Some(halt_time) = self.simulation_halt_time {
            if !halt_time.is_finite() {
                return Err(ContractError::incompatible("simulation halt time", "a finite time", halt_time));
            }
        }
        for (scenario_id, halt_time) in &self.scenario_halt_times {
            if !halt_time.is_finite() {
                return Err(ContractError::incompatible(
                    format!("halt time of scenario {scenario_id}"),
                    "a finite time",
                    halt_time,
                ));
            }
        }
        if self.continue_from_progress_log && self.progress_log.is_none() {
            return Err(ContractError::incompatible(
                "continue from progress log",
                "a progress log path",
                "none",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let parameters = ExperimentParameters::from_json_str(
            r#"{"thread_count": 4, "scenario_halt_times": {"2": 7.5}, "simulation_halt_time": 10.0}"#,
        )
        .unwrap();
        assert_eq!(parameters.thread_count, 4);
        assert!(!parameters.record_state);
        assert_eq!(parameters.halt_time_for(ScenarioId::new(2)), Some(7.5));
        assert_eq!(parameters.halt_time_for(ScenarioId::new(3)), Some(10.0));
    }

    #[test]
    fn test_continue_without_log_is_rejected() {
        let err = ExperimentParameters::from_json_str(r#"{"continue_from_progress_log": true}"#).unwrap_err();
        assert!(err.is_contract());
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(ExperimentParameters::from_json_str("{thread_count: 4").is_err());
    }

    #[test]
    fn test_scenario_subset() {
        let parameters = ExperimentParameters {
            scenario_ids: Some([ScenarioId::new(1)].into_iter().collect()),
            ..ExperimentParameters::default()
        };
        assert!(parameters.includes(ScenarioId::new(1)));
        assert!(!parameters.includes(ScenarioId::new(0)));
        assert!(ExperimentParameters::default().includes(ScenarioId::new(0)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        let parameters = ExperimentParameters {
            thread_count: 3,
            master_seed: 42,
            ..ExperimentParameters::default()
        };
        fs::write(&path, serde_json::to_string(&parameters).unwrap()).unwrap();
        assert_eq!(ExperimentParameters::from_json_file(&path).unwrap(), parameters);
    }
}
