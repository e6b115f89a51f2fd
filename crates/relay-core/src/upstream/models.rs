//! The model table shipped with the binary.
//!
//! `/v1/models` is served from this map rather than a per-request upstream
//! call; the upstream's own listing needs a valid credential and changes
//! rarely.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Deserialize;

const MODELS_JSON: &str = include_str!("models.json");

#[derive(Debug, Deserialize)]
struct ModelTable {
    models: BTreeMap<String, ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

fn table() -> &'static ModelTable {
    static TABLE: OnceLock<ModelTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        serde_json::from_str(MODELS_JSON).expect("bundled models.json is valid")
    })
}

/// All known model ids.
pub fn model_ids() -> Vec<&'static str> {
    table().models.keys().map(String::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_parses_and_is_nonempty() {
        let ids = model_ids();
        assert!(!ids.is_empty());
        assert!(ids.contains(&"gemini-3-pro-preview"));
    }
}
