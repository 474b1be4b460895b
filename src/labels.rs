//! Label table and its ordered loader chain.
//!
//! The table is built once at startup from the first source that succeeds:
//! dataset description file, then labels embedded in the model, then the
//! built-in food list. It is never mutated afterwards.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::DetectorBackend;

/// Built-in labels of the bundled food detector, index = class id.
pub const BUILTIN_FOOD_LABELS: [&str; 30] = [
    "baby corn",
    "bean sprout",
    "black glutinous rice",
    "boiled egg",
    "brocoli",
    "cabbage",
    "carrot",
    "chicken breast",
    "chicken leg",
    "corn",
    "cucumber",
    "dark green leaf vegetable",
    "fried chicken",
    "fried egg",
    "fried tofu",
    "green bean",
    "green pepper",
    "oily tofu",
    "okra",
    "pork chop",
    "rice",
    "salmon",
    "sausage",
    "scrambled eggs with tomatoes",
    "shred chicken",
    "shrimp",
    "shrimp roll",
    "stewed pork",
    "sweet potato",
    "tomato",
];

/// Immutable, cheaply clonable class-id to name table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTable {
    names: Arc<[String]>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into(),
        }
    }

    /// Build from the first source in `sources` that yields a non-empty list.
    ///
    /// Failing or empty sources are logged and skipped. If every source fails
    /// the table is empty and all lookups resolve to synthetic names.
    pub fn load(sources: &[&dyn LabelSource]) -> Self {
        for source in sources {
            match source.load() {
                Ok(names) if !names.is_empty() => {
                    log::info!("loaded {} class names from {}", names.len(), source.describe());
                    return Self::new(names);
                }
                Ok(_) => log::warn!("label source {} yielded no names", source.describe()),
                Err(err) => log::warn!("label source {} failed: {:#}", source.describe(), err),
            }
        }
        log::warn!("no label source succeeded; detections will use synthetic class names");
        Self::default()
    }

    /// Resolve a class id, falling back to `class_{id}` when out of range.
    pub fn resolve(&self, class_id: usize) -> Cow<'_, str> {
        match self.names.get(class_id) {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(format!("class_{}", class_id)),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One strategy in the label loader chain.
pub trait LabelSource {
    /// Short description for logs.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Vec<String>>;
}

/// Dataset description file carrying a `names` key.
///
/// `names` may be a list or an `{id: name}` map. The format follows the file
/// extension: `.json`, `.toml`, otherwise YAML.
pub struct DatasetFile {
    path: PathBuf,
}

impl DatasetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Class ids above this are treated as a malformed label source.
pub const MAX_CLASS_ID: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DatasetNames {
    List(Vec<String>),
    Map(BTreeMap<ClassKey, String>),
}

/// Map key of the `{id: name}` form. YAML keys arrive as integers, JSON and
/// TOML keys as strings.
#[derive(Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(untagged)]
enum ClassKey {
    Id(usize),
    Text(String),
}

impl ClassKey {
    fn id(&self) -> Result<usize> {
        match self {
            ClassKey::Id(id) => Ok(*id),
            ClassKey::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| anyhow!("class id '{}' is not a non-negative integer", text)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DatasetDescription {
    names: Option<DatasetNames>,
}

impl LabelSource for DatasetFile {
    fn describe(&self) -> String {
        format!("dataset file {}", self.path.display())
    }

    fn load(&self) -> Result<Vec<String>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let description = parse_dataset(&self.path, &raw)?;
        match description.names {
            Some(DatasetNames::List(names)) => Ok(names),
            Some(DatasetNames::Map(map)) => {
                let mut ids = BTreeMap::new();
                for (key, name) in map {
                    ids.insert(key.id()?, name);
                }
                dense_names(ids)
                    .with_context(|| format!("invalid `names` in {}", self.path.display()))
            }
            None => Err(anyhow!("{} has no `names` key", self.path.display())),
        }
    }
}

fn parse_dataset(path: &Path, raw: &str) -> Result<DatasetDescription> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let parsed = match extension.as_deref() {
        Some("json") => serde_json::from_str(raw).map_err(anyhow::Error::from),
        Some("toml") => toml::from_str(raw).map_err(anyhow::Error::from),
        _ => serde_yaml::from_str(raw).map_err(anyhow::Error::from),
    };
    parsed.with_context(|| format!("invalid dataset file {}", path.display()))
}

/// Expand an `{id: name}` map into an index-ordered list, filling gaps with
/// `class_{id}`.
pub(crate) fn dense_names(map: BTreeMap<usize, String>) -> Result<Vec<String>> {
    let Some(max_id) = map.keys().next_back().copied() else {
        return Ok(Vec::new());
    };
    if max_id > MAX_CLASS_ID {
        return Err(anyhow!(
            "class id {} exceeds the maximum of {}",
            max_id,
            MAX_CLASS_ID
        ));
    }
    Ok((0..=max_id)
        .map(|id| {
            map.get(&id)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", id))
        })
        .collect())
}

/// Labels embedded in the loaded engine's model artifact.
pub struct EngineMetadata<'a> {
    backend: Option<&'a dyn DetectorBackend>,
}

impl<'a> EngineMetadata<'a> {
    pub fn new(backend: Option<&'a dyn DetectorBackend>) -> Self {
        Self { backend }
    }
}

impl LabelSource for EngineMetadata<'_> {
    fn describe(&self) -> String {
        match self.backend {
            Some(backend) => format!("{} model metadata", backend.name()),
            None => "model metadata".to_string(),
        }
    }

    fn load(&self) -> Result<Vec<String>> {
        let backend = self
            .backend
            .ok_or_else(|| anyhow!("no detection engine loaded"))?;
        backend
            .embedded_labels()
            .ok_or_else(|| anyhow!("engine exposes no label metadata"))
    }
}

/// The fixed built-in food list.
pub struct BuiltinLabels;

impl LabelSource for BuiltinLabels {
    fn describe(&self) -> String {
        "built-in food list".to_string()
    }

    fn load(&self) -> Result<Vec<String>> {
        Ok(BUILTIN_FOOD_LABELS.iter().map(|s| s.to_string()).collect())
    }
}
