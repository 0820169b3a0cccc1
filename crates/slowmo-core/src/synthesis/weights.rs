//! Serialized model parameters: a JSON map from parameter path to tensor.
//!
//! ```json
//! { "module.flow.refine.weight": { "shape": [3, 3], "data": [0, 0, 0, 0, 1, 0, 0, 0, 0] } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::SynthesisError;

/// Prefixes left on parameter paths by data-parallel training wrappers.
const LEGACY_PREFIXES: &[&str] = &["module."];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl ParamTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelWeights {
    params: BTreeMap<String, ParamTensor>,
}

fn strip_legacy_prefix(key: &str) -> &str {
    let mut key = key;
    while let Some(rest) = LEGACY_PREFIXES.iter().find_map(|p| key.strip_prefix(p)) {
        key = rest;
    }
    key
}

impl ModelWeights {
    pub fn from_json(text: &str) -> Result<Self, SynthesisError> {
        let raw: BTreeMap<String, ParamTensor> = serde_json::from_str(text)
            .map_err(|e| SynthesisError::model_unavailable(format!("invalid weights file: {e}")))?;

        let mut params = BTreeMap::new();
        for (key, tensor) in raw {
            if !tensor.is_consistent() {
                warn!(
                    key = %key,
                    shape = ?tensor.shape,
                    len = tensor.data.len(),
                    "parameter shape does not match its data, skipping"
                );
                continue;
            }
            params.insert(strip_legacy_prefix(&key).to_string(), tensor);
        }
        Ok(Self { params })
    }

    pub fn load(path: &Path) -> Result<Self, SynthesisError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SynthesisError::model_unavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        let weights = Self::from_json(&text)?;
        info!(?path, params = weights.len(), "loaded model weights");
        Ok(weights)
    }

    pub fn insert(&mut self, key: &str, tensor: ParamTensor) {
        self.params.insert(strip_legacy_prefix(key).to_string(), tensor);
    }

    pub fn get(&self, key: &str) -> Option<&ParamTensor> {
        self.params.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn legacy_prefix_is_stripped() {
        let w = ModelWeights::from_json(
            r#"{
                "module.mask.bias": {"shape": [1], "data": [0.5]},
                "merge.gain": {"shape": [3], "data": [1, 1, 1]}
            }"#,
        )
        .unwrap();
        assert_eq!(w.get("mask.bias").unwrap().data, vec![0.5]);
        assert!(w.get("module.mask.bias").is_none());
        assert_eq!(w.len(), 2);
    }

    #[traced_test]
    #[test]
    fn inconsistent_tensor_is_skipped_with_warning() {
        let w = ModelWeights::from_json(r#"{"mask.bias": {"shape": [2], "data": [0.5]}}"#).unwrap();
        assert!(w.is_empty());
        assert!(logs_contain("does not match its data"));
    }

    #[test]
    fn malformed_json_is_model_unavailable() {
        let err = ModelWeights::from_json("not json").unwrap_err();
        assert!(matches!(err, SynthesisError::ModelUnavailable(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flownet.json");
        std::fs::write(&path, r#"{"module.mask.gain": {"shape": [1], "data": [2.0]}}"#).unwrap();
        let w = ModelWeights::load(&path).unwrap();
        assert_eq!(w.keys().collect::<Vec<_>>(), vec!["mask.gain"]);

        let err = ModelWeights::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, SynthesisError::ModelUnavailable(_)));
    }
}
