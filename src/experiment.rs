use crate::{
    error::{Error, Result},
    model::CoreKind,
};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::{fs, path::Path};

/// The predictor fields of an experiment file, found at
/// `AgentComponent[General.IDOfAgentToControl].Simulator.InfluencePredictor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PredictorSettings {
    #[serde(rename = "numberOfHiddenStates")]
    pub hidden_size: i64,
    #[serde(rename = "Type", default)]
    pub core: CoreKind,
}

#[derive(Deserialize)]
struct ExperimentFile {
    #[serde(rename = "General")]
    general: General,
    #[serde(rename = "AgentComponent")]
    agent_component: Mapping,
}

#[derive(Deserialize)]
struct General {
    #[serde(rename = "IDOfAgentToControl")]
    id_of_agent_to_control: Value,
}

#[derive(Deserialize)]
struct AgentComponent {
    #[serde(rename = "Simulator")]
    simulator: Option<Simulator>,
}

#[derive(Deserialize)]
struct Simulator {
    #[serde(rename = "InfluencePredictor")]
    influence_predictor: Option<PredictorSettings>,
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl PredictorSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ExperimentFile = serde_yaml::from_str(yaml)?;
        let id = &file.general.id_of_agent_to_control;
        let id_key = scalar_key(id);

        // agent ids may be written as numbers in one place and strings in the other
        let (_, agent) = file
            .agent_component
            .iter()
            .find(|&(key, _)| key == id || (id_key.is_some() && scalar_key(key) == id_key))
            .ok_or_else(|| {
                Error::Experiment(format!("no AgentComponent entry for agent {id:?}"))
            })?;

        let agent: AgentComponent = serde_yaml::from_value(agent.clone())?;
        let settings = agent
            .simulator
            .and_then(|simulator| simulator.influence_predictor)
            .ok_or_else(|| {
                Error::Experiment(format!(
                    "agent {id:?} has no Simulator.InfluencePredictor section"
                ))
            })?;

        if settings.hidden_size <= 0 {
            return Err(Error::Experiment(format!(
                "numberOfHiddenStates must be positive, got {}",
                settings.hidden_size
            )));
        }
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPERIMENT: &str = r#"
General:
  IDOfAgentToControl: 1
  horizon: 100
AgentComponent:
  0:
    Type: Random
  1:
    Type: POMCP
    Simulator:
      Type: Local
      InfluencePredictor:
        recurrent: true
        Type: RNN
        numberOfHiddenStates: 16
"#;

    #[test]
    fn reads_controlled_agent_settings() {
        let settings = PredictorSettings::from_yaml_str(EXPERIMENT).unwrap();
        assert_eq!(
            settings,
            PredictorSettings {
                hidden_size: 16,
                core: CoreKind::Rnn,
            }
        );
    }

    #[test]
    fn matches_string_ids_and_defaults_to_gru() {
        let yaml = r#"
General:
  IDOfAgentToControl: "0"
AgentComponent:
  0:
    Simulator:
      InfluencePredictor:
        numberOfHiddenStates: 4
"#;
        let settings = PredictorSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.core, CoreKind::Gru);
        assert_eq!(settings.hidden_size, 4);
    }

    #[test]
    fn core_type_is_case_insensitive() {
        let yaml = EXPERIMENT.replace("Type: RNN", "Type: gru");
        let settings = PredictorSettings::from_yaml_str(&yaml).unwrap();
        assert_eq!(settings.core, CoreKind::Gru);

        let yaml = EXPERIMENT.replace("Type: RNN", "Type: Rnn");
        let settings = PredictorSettings::from_yaml_str(&yaml).unwrap();
        assert_eq!(settings.core, CoreKind::Rnn);

        let yaml = EXPERIMENT.replace("Type: RNN", "Type: LSTM");
        assert!(matches!(
            PredictorSettings::from_yaml_str(&yaml),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn rejects_non_positive_hidden_states() {
        let yaml = EXPERIMENT.replace("numberOfHiddenStates: 16", "numberOfHiddenStates: 0");
        assert!(matches!(
            PredictorSettings::from_yaml_str(&yaml),
            Err(Error::Experiment(_))
        ));
    }

    #[test]
    fn reports_missing_sections() {
        let yaml = EXPERIMENT.replace("IDOfAgentToControl: 1", "IDOfAgentToControl: 0");
        assert!(matches!(
            PredictorSettings::from_yaml_str(&yaml),
            Err(Error::Experiment(_))
        ));

        let yaml = EXPERIMENT.replace("IDOfAgentToControl: 1", "IDOfAgentToControl: 7");
        assert!(matches!(
            PredictorSettings::from_yaml_str(&yaml),
            Err(Error::Experiment(_))
        ));
    }
}
