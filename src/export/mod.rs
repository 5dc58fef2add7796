use crate::{
    error::{Error, Result},
    model::{CoreKind, RnnPredictor},
};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fs,
    path::{Component, Path, PathBuf},
};
use tch::{Device, nn};
use tracing::info;

pub const MODEL_FILE: &str = "model.safetensors";
pub const METADATA_FILE: &str = "model.toml";

/// Everything besides the weights needed to rebuild a predictor
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub core: CoreKind,
    pub input_size: i64,
    pub hidden_size: i64,
    pub output_classes: Vec<i64>,
}

impl ModelMetadata {
    pub fn of(predictor: &RnnPredictor) -> Self {
        Self {
            core: predictor.core_kind(),
            input_size: predictor.input_size(),
            hidden_size: predictor.hidden_size(),
            output_classes: predictor.output_classes().to_vec(),
        }
    }
}

/// A predictor rebuilt from disk together with the store owning its parameters
pub struct ExportedModel {
    pub store: nn::VarStore,
    pub predictor: RnnPredictor,
    pub metadata: ModelMetadata,
}

/// Where the model (and by default the training data) of an experiment config lives
///
/// `configs/GridTraffic/agent.yaml` maps to `models/GridTraffic/agent`.
pub fn model_dir_for<P: AsRef<Path>>(config_path: P) -> PathBuf {
    let stripped = config_path.as_ref().with_extension("");

    stripped
        .components()
        .map(|component| match component {
            Component::Normal(name) if name == OsStr::new("configs") => {
                Component::Normal(OsStr::new("models"))
            }
            other => other,
        })
        .collect()
}

/// Writes the named parameters and the metadata of `predictor` into `dir`
///
/// The parameters keep their libtorch names (`gru.weight_ih_l0`, `linear_layer.bias`, ...).
pub fn export_model<P: AsRef<Path>>(
    store: &nn::VarStore,
    predictor: &RnnPredictor,
    dir: P,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let model_path = dir.join(MODEL_FILE);
    store.save(&model_path)?;

    let metadata_path = dir.join(METADATA_FILE);
    let toml_str = toml::to_string(&ModelMetadata::of(predictor))?;
    fs::write(&metadata_path, toml_str).map_err(|e| Error::io(&metadata_path, e))?;

    info!("Model saved at {model_path:?}");
    Ok(model_path)
}

pub fn load_metadata<P: AsRef<Path>>(dir: P) -> Result<ModelMetadata> {
    let path = dir.as_ref().join(METADATA_FILE);
    let toml_str = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    Ok(toml::from_str(&toml_str)?)
}

pub fn load_model<P: AsRef<Path>>(dir: P, device: Device) -> Result<ExportedModel> {
    let dir = dir.as_ref();
    let metadata = load_metadata(dir)?;

    let mut store = nn::VarStore::new(device);
    let predictor = RnnPredictor::new(
        store.root(),
        metadata.input_size,
        metadata.output_classes.clone(),
        metadata.hidden_size,
        metadata.core,
    )?;

    let model_path = dir.join(MODEL_FILE);
    if !model_path.is_file() {
        return Err(Error::MissingData(model_path));
    }
    store.load(&model_path)?;

    info!("Loaded {} model from {model_path:?}", metadata.core);

    Ok(ExportedModel {
        store,
        predictor,
        metadata,
    })
}
