//! Scheduling hints.
//!
//! A hint file maps test units to weights, usually their duration in
//! seconds from an earlier run. The format follows the file extension:
//!
//! ```toml
//! # hints.toml
//! [weights]
//! "tests/test_models.py" = 120.0
//! "test_utils.py" = 3.5
//! ```
//!
//! ```json
//! {"weights": {"tests/test_models.py": 120.0, "test_utils.py": 3.5}}
//! ```
//!
//! A key matches a unit when it equals the unit id or the unit's file name.
//! Units without a hint weigh 1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::framework::TestUnit;

/// Weight of a unit that has no hint.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Errors raised while loading a hint file.
#[derive(Debug, thiserror::Error)]
pub enum HintError {
    #[error("Failed to read hint file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse hint file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse hint file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A weight is negative or not a number.
    #[error("Invalid weight {weight} for `{unit}`")]
    InvalidWeight { unit: String, weight: f64 },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HintFile {
    #[serde(default)]
    weights: HashMap<String, f64>,
}

/// Unit weights loaded from a hint file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    weights: HashMap<String, f64>,
}

impl Hints {
    /// Creates hints from a map, rejecting negative and non-finite weights.
    pub fn from_weights(weights: HashMap<String, f64>) -> Result<Self, HintError> {
        if let Some((unit, weight)) = weights
            .iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(HintError::InvalidWeight {
                unit: unit.clone(),
                weight: *weight,
            });
        }
        Ok(Self { weights })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weight for `unit_id`: exact key, then file name, then [`DEFAULT_WEIGHT`].
    pub fn weight_for(&self, unit_id: &str) -> f64 {
        if let Some(weight) = self.weights.get(unit_id) {
            return *weight;
        }
        Path::new(unit_id)
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.weights.get(name))
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Sets the weight of every unit.
    pub fn apply(&self, units: Vec<TestUnit>) -> Vec<TestUnit> {
        units
            .into_iter()
            .map(|unit| {
                let weight = self.weight_for(unit.id());
                unit.with_weight(weight)
            })
            .collect()
    }
}

/// Loads a hint file. `.json` files are read as JSON, anything else as TOML.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or holds an
/// invalid weight.
pub fn load_hints(path: &Path) -> Result<Hints, HintError> {
    let content = std::fs::read_to_string(path).map_err(|source| HintError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let file: HintFile = if is_json {
        serde_json::from_str(&content).map_err(|source| HintError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(&content).map_err(|source| HintError::Toml {
            path: path.to_path_buf(),
            source,
        })?
    };

    let hints = Hints::from_weights(file.weights)?;
    debug!("Loaded {} hints from {}", hints.len(), path.display());
    Ok(hints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "hints.toml",
            "[weights]\n\"tests/test_a.py\" = 12.5\n\"test_b.py\" = 3\n",
        );
        let hints = load_hints(&path).unwrap();
        assert_eq!(hints.weight_for("tests/test_a.py"), 12.5);
        assert_eq!(hints.weight_for("tests/sub/test_b.py"), 3.0);
        assert_eq!(hints.weight_for("tests/test_c.py"), DEFAULT_WEIGHT);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "hints.json", r#"{"weights": {"test_a.py": 7.0}}"#);
        let hints = load_hints(&path).unwrap();
        assert_eq!(hints.weight_for("tests/test_a.py"), 7.0);
    }

    #[test]
    fn test_exact_key_wins_over_file_name() {
        let hints = Hints::from_weights(HashMap::from([
            ("test_a.py".to_string(), 1.5),
            ("slow/test_a.py".to_string(), 40.0),
        ]))
        .unwrap();
        assert_eq!(hints.weight_for("slow/test_a.py"), 40.0);
        assert_eq!(hints.weight_for("fast/test_a.py"), 1.5);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "hints.toml", "[weights]\n\"a.py\" = -1.0\n");
        assert!(matches!(
            load_hints(&path),
            Err(HintError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_hints(&dir.path().join("nope.toml")),
            Err(HintError::Read { .. })
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "hints.json", "{not json");
        assert!(matches!(load_hints(&path), Err(HintError::Json { .. })));
    }

    #[test]
    fn test_apply_sets_weights() {
        let hints = Hints::from_weights(HashMap::from([("a.py".to_string(), 9.0)])).unwrap();
        let units = hints.apply(vec![TestUnit::new("a.py"), TestUnit::new("b.py")]);
        assert_eq!(units[0].weight(), 9.0);
        assert_eq!(units[1].weight(), 1.0);
    }
}
