//! Safetensors export of the behavior predictor with schema metadata, and
//! output parity validation of the exported file.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use safetensors::SafeTensors;
use tracing::{debug, info};

use taleweave_core::feature_schema::{
    ACTION_HEAD_SIZE, EMOTION_HEAD_SIZE, Head, SCHEMA_VERSION, SPEECH_HEAD_SIZE, THOUGHT_HEAD_SIZE,
    TOTAL_INPUT_FEATURES, TOTAL_OUTPUT_FEATURES,
};

use crate::model::{BehaviorModelConfig, BehaviorPredictor};

/// Default absolute tolerance for [`validate_parity`].
pub const PARITY_ATOL: f32 = 1e-5;

/// Rows in the random parity batch.
const PARITY_BATCH: usize = 4;

/// Metadata stored in the safetensors header.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportMetadata {
    pub input_features: usize,
    pub output_features: usize,
    pub action_head: usize,
    pub speech_head: usize,
    pub thought_head: usize,
    pub emotion_head: usize,
    pub schema_version: u32,
    pub trunk_dims: Vec<usize>,
    pub head_hidden: usize,
    pub dropout: f32,
    pub epoch: Option<usize>,
    pub val_loss: Option<f64>,
}

impl ExportMetadata {
    /// Metadata describing `config` under the current schema.
    pub fn new(config: &BehaviorModelConfig) -> Self {
        Self {
            input_features: config.input_dim,
            output_features: TOTAL_OUTPUT_FEATURES,
            action_head: ACTION_HEAD_SIZE,
            speech_head: SPEECH_HEAD_SIZE,
            thought_head: THOUGHT_HEAD_SIZE,
            emotion_head: EMOTION_HEAD_SIZE,
            schema_version: SCHEMA_VERSION,
            trunk_dims: config.trunk_dims.clone(),
            head_hidden: config.head_hidden,
            dropout: config.dropout,
            epoch: None,
            val_loss: None,
        }
    }

    pub fn with_checkpoint(mut self, epoch: usize, val_loss: f64) -> Self {
        self.epoch = Some(epoch);
        self.val_loss = Some(val_loss);
        self
    }

    pub fn model_config(&self) -> BehaviorModelConfig {
        BehaviorModelConfig {
            input_dim: self.input_features,
            trunk_dims: self.trunk_dims.clone(),
            head_hidden: self.head_hidden,
            dropout: self.dropout,
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("input_features".into(), self.input_features.to_string());
        map.insert("output_features".into(), self.output_features.to_string());
        map.insert("action_head".into(), self.action_head.to_string());
        map.insert("speech_head".into(), self.speech_head.to_string());
        map.insert("thought_head".into(), self.thought_head.to_string());
        map.insert("emotion_head".into(), self.emotion_head.to_string());
        map.insert("schema_version".into(), self.schema_version.to_string());
        map.insert(
            "trunk_dims".into(),
            self.trunk_dims
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
        map.insert("head_hidden".into(), self.head_hidden.to_string());
        map.insert("dropout".into(), self.dropout.to_string());
        if let Some(epoch) = self.epoch {
            map.insert("epoch".into(), epoch.to_string());
        }
        if let Some(val_loss) = self.val_loss {
            map.insert("val_loss".into(), val_loss.to_string());
        }
        map
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        fn field<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str) -> Result<T> {
            let raw = map
                .get(key)
                .ok_or_else(|| anyhow!("missing metadata field: {key}"))?;
            raw.parse()
                .map_err(|_| anyhow!("invalid metadata field {key}: {raw:?}"))
        }
        fn optional<T: std::str::FromStr>(
            map: &HashMap<String, String>,
            key: &str,
        ) -> Result<Option<T>> {
            map.contains_key(key).then(|| field(map, key)).transpose()
        }

        let trunk_dims = map
            .get("trunk_dims")
            .ok_or_else(|| anyhow!("missing metadata field: trunk_dims"))?
            .split(',')
            .map(|dim| dim.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("invalid metadata field trunk_dims")?;

        Ok(Self {
            input_features: field(map, "input_features")?,
            output_features: field(map, "output_features")?,
            action_head: field(map, "action_head")?,
            speech_head: field(map, "speech_head")?,
            thought_head: field(map, "thought_head")?,
            emotion_head: field(map, "emotion_head")?,
            schema_version: field(map, "schema_version")?,
            trunk_dims,
            head_hidden: field(map, "head_hidden")?,
            dropout: field(map, "dropout")?,
            epoch: optional(map, "epoch")?,
            val_loss: optional(map, "val_loss")?,
        })
    }

    /// Every dimension must match the compiled-in schema.
    pub fn check_schema(&self) -> Result<()> {
        ensure!(
            self.schema_version == SCHEMA_VERSION,
            "schema version mismatch: file has {}, expected {SCHEMA_VERSION}",
            self.schema_version
        );
        let checks = [
            ("input_features", self.input_features, TOTAL_INPUT_FEATURES),
            (
                "output_features",
                self.output_features,
                TOTAL_OUTPUT_FEATURES,
            ),
            ("action_head", self.action_head, ACTION_HEAD_SIZE),
            ("speech_head", self.speech_head, SPEECH_HEAD_SIZE),
            ("thought_head", self.thought_head, THOUGHT_HEAD_SIZE),
            ("emotion_head", self.emotion_head, EMOTION_HEAD_SIZE),
        ];
        for (name, found, expected) in checks {
            ensure!(
                found == expected,
                "{name} mismatch: file has {found}, expected {expected}"
            );
        }
        Ok(())
    }
}

/// Write every variable of `varmap` plus `metadata` to `path`.
pub fn save_model(varmap: &VarMap, path: &Path, metadata: &ExportMetadata) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tensors: Vec<(String, Tensor)> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;
        let mut tensors: Vec<(String, Tensor)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        tensors
    };

    safetensors::serialize_to_file(tensors, &Some(metadata.to_map()), path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Saved model");
    Ok(())
}

/// Read and check the export metadata of a safetensors file.
pub fn read_metadata(path: &Path) -> Result<ExportMetadata> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    metadata_from_bytes(&bytes, path)
}

fn metadata_from_bytes(bytes: &[u8], path: &Path) -> Result<ExportMetadata> {
    let (_, header) = SafeTensors::read_metadata(bytes)
        .with_context(|| format!("Invalid safetensors file {}", path.display()))?;
    let map = header
        .metadata()
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no export metadata", path.display()))?;
    let metadata = ExportMetadata::from_map(map)?;
    metadata.check_schema()?;
    Ok(metadata)
}

/// Load an exported model, checking its metadata against the schema first.
pub fn load_model(path: &Path, device: &Device) -> Result<(BehaviorPredictor, ExportMetadata)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let metadata = metadata_from_bytes(&bytes, path)?;

    let vb = VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)?;
    let model = BehaviorPredictor::new(vb, &metadata.model_config())
        .with_context(|| format!("Failed to load weights from {}", path.display()))?;
    Ok((model, metadata))
}

/// Load a checkpoint into a fresh variable map, keeping the variables
/// trainable and re-serializable.
pub fn load_checkpoint(
    path: &Path,
    device: &Device,
) -> Result<(VarMap, BehaviorPredictor, ExportMetadata)> {
    let metadata = read_metadata(path)?;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = BehaviorPredictor::new(vb, &metadata.model_config())?;
    varmap
        .load(path)
        .with_context(|| format!("Failed to load weights from {}", path.display()))?;
    Ok((varmap, model, metadata))
}

/// Largest absolute output difference per head on a random batch.
pub fn parity_diffs(
    reference: &BehaviorPredictor,
    exported: &BehaviorPredictor,
    device: &Device,
) -> Result<Vec<(Head, f32)>> {
    let input_dim = reference.config().input_dim;
    let xs = Tensor::randn(0f32, 1f32, (PARITY_BATCH, input_dim), device)?;
    let expected = reference.forward(&xs)?;
    let actual = exported.forward(&xs)?;

    Head::ALL
        .iter()
        .map(|&head| {
            let diff = (expected.get(head) - actual.get(head))?
                .abs()?
                .flatten_all()?
                .max(0)?
                .to_scalar::<f32>()?;
            Ok((head, diff))
        })
        .collect()
}

/// Fail unless both models agree within `atol` on every head.
pub fn validate_parity(
    reference: &BehaviorPredictor,
    exported: &BehaviorPredictor,
    device: &Device,
    atol: f32,
) -> Result<()> {
    for (head, max_diff) in parity_diffs(reference, exported, device)? {
        if !(max_diff <= atol) {
            bail!("parity check failed for {head} head: max diff = {max_diff:.2e}");
        }
        info!(head = head.name(), max_diff = %format!("{max_diff:.2e}"), "Parity OK");
    }
    Ok(())
}

/// Export the model in `varmap` to `path`, reload it and validate parity.
pub fn export_and_validate(
    varmap: &VarMap,
    reference: &BehaviorPredictor,
    path: &Path,
    metadata: &ExportMetadata,
    device: &Device,
) -> Result<()> {
    save_model(varmap, path, metadata)?;
    let (exported, _) = load_model(path, device)?;
    validate_parity(reference, &exported, device, PARITY_ATOL)?;
    info!(path = %path.display(), "Exported model");
    Ok(())
}

/// Re-export a training checkpoint to `output` and validate it.
pub fn export_checkpoint(
    checkpoint: &Path,
    output: &Path,
    device: &Device,
) -> Result<ExportMetadata> {
    let (varmap, model, metadata) = load_checkpoint(checkpoint, device)?;
    export_and_validate(&varmap, &model, output, &metadata, device)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> (VarMap, BehaviorPredictor) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = BehaviorPredictor::new(vb, &BehaviorModelConfig::default()).unwrap();
        (varmap, model)
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("taleweave-export-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_metadata_map_round_trip() {
        let meta = ExportMetadata::new(&BehaviorModelConfig::default()).with_checkpoint(7, 0.125);
        let parsed = ExportMetadata::from_map(&meta.to_map()).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.trunk_dims, vec![384, 256, 256]);
        parsed.check_schema().unwrap();
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let mut meta = ExportMetadata::new(&BehaviorModelConfig::default());
        meta.speech_head = 7;
        let err = meta.check_schema().unwrap_err();
        assert!(err.to_string().contains("speech_head"));
    }

    #[test]
    fn test_missing_metadata_field() {
        let mut map = ExportMetadata::new(&BehaviorModelConfig::default()).to_map();
        map.remove("output_features");
        let err = ExportMetadata::from_map(&map).unwrap_err();
        assert!(err.to_string().contains("output_features"));
    }

    #[test]
    fn test_export_reload_parity() {
        let (varmap, model) = build();
        let path = temp_path("parity.safetensors");
        let meta = ExportMetadata::new(model.config());

        export_and_validate(&varmap, &model, &path, &meta, &Device::Cpu).unwrap();
        let (_, loaded_meta) = load_model(&path, &Device::Cpu).unwrap();
        assert_eq!(loaded_meta, meta);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_export_checkpoint_keeps_weights() {
        let (varmap, model) = build();
        let checkpoint = temp_path("checkpoint.safetensors");
        let output = temp_path("exported.safetensors");
        let meta = ExportMetadata::new(model.config()).with_checkpoint(3, 0.5);
        save_model(&varmap, &checkpoint, &meta).unwrap();

        let exported_meta = export_checkpoint(&checkpoint, &output, &Device::Cpu).unwrap();
        assert_eq!(exported_meta.epoch, Some(3));

        let (exported, _) = load_model(&output, &Device::Cpu).unwrap();
        validate_parity(&model, &exported, &Device::Cpu, PARITY_ATOL).unwrap();

        std::fs::remove_file(&checkpoint).ok();
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_parity_failure_names_head() {
        let (_, model) = build();
        let (_, other) = build();

        let err = validate_parity(&model, &other, &Device::Cpu, PARITY_ATOL).unwrap_err();
        let message = err.to_string();
        assert!(
            message.starts_with("parity check failed for action head"),
            "{message}"
        );
        assert!(message.contains("max diff"));
    }
}
