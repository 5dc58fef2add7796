use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Missing data file: {0:?}")]
    MissingData(PathBuf),
    #[error("Invalid tensor shape for {name}: expected {expected}, got {actual:?}")]
    Shape {
        name: &'static str,
        expected: &'static str,
        actual: Vec<i64>,
    },
    #[error("Output feature {feature} has target {value} outside of [0, {classes})")]
    TargetOutOfRange {
        feature: usize,
        value: i64,
        classes: i64,
    },
    #[error("Training set is empty (dataset of {total} sequences split at {ratio})")]
    EmptyTrainingSet { total: i64, ratio: f64 },
    #[error("Invalid model dimensions: {0}")]
    InvalidModel(String),
    #[error("Initial distribution {index} needs non-negative weights with a positive sum")]
    InvalidDistribution { index: usize },
    #[error("Unknown recurrent core type: {0}")]
    UnknownCore(String),
    #[error("Invalid experiment config: {0}")]
    Experiment(String),
    #[error("Exported model is missing parameter {0}")]
    MissingParameter(String),
    #[error("Expected {expected} values for {name}, got {actual}")]
    Length {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
