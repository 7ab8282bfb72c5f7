//! Municipality names from a GeoJSON boundary file.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use osc_core::BoundaryRecord;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

pub const DEFAULT_NAME_PROPERTY: &str = "NM_MUN";
pub const GEOMETRY_ID_PROPERTY: &str = "CD_MUN";

pub async fn load_boundaries(path: &Path, name_property: &str) -> Result<Vec<BoundaryRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading boundaries {}", path.display()))?;
    let boundaries = parse_boundaries(&text, name_property)
        .with_context(|| format!("parsing boundaries {}", path.display()))?;
    info!(path = %path.display(), count = boundaries.len(), "boundaries loaded");
    Ok(boundaries)
}

/// Reads one record per feature. Features without a string name are skipped.
pub fn parse_boundaries(text: &str, name_property: &str) -> Result<Vec<BoundaryRecord>> {
    let value: JsonValue = serde_json::from_str(text).context("decoding GeoJSON")?;
    let features = value
        .get("features")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| anyhow!("GeoJSON has no features array"))?;

    let mut boundaries = Vec::with_capacity(features.len());
    let mut skipped = 0usize;
    for feature in features {
        let properties = feature.get("properties");
        let name = properties
            .and_then(|p| p.get(name_property))
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            skipped += 1;
            continue;
        };
        let geometry_id = properties
            .and_then(|p| p.get(GEOMETRY_ID_PROPERTY))
            .or_else(|| feature.get("id"))
            .and_then(scalar_to_string);
        boundaries.push(BoundaryRecord {
            municipality_name: name.to_string(),
            geometry_id,
        });
    }

    if skipped > 0 {
        warn!(skipped, name_property, "features without a municipality name were skipped");
    }
    Ok(boundaries)
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
