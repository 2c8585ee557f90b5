//! Ordered emotion label sets.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four-class preset used by the canonical model.
pub const FOUR_CLASS: [&str; 4] = ["neutral", "happy", "sad", "angry"];

/// Seven-class preset over the RAVDESS emotions.
pub const RAVDESS: [&str; 7] = [
    "neutral", "happy", "sad", "angry", "fear", "disgust", "surprise",
];

/// Ordered, fixed enumeration of emotion names mapped to contiguous indices.
///
/// The same set must be used at training and inference time; it is stored in
/// every model artifact and feature cache for that reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Build a label set, normalizing names to lowercase.
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .collect();

        if names.is_empty() {
            return Err(ConfigError::InvalidLabels("no labels".into()));
        }
        if let Some(pos) = names.iter().position(String::is_empty) {
            return Err(ConfigError::InvalidLabels(format!("empty label at {pos}")));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(ConfigError::InvalidLabels(format!("duplicate label {name:?}")));
            }
        }

        Ok(Self { names })
    }

    /// {neutral, happy, sad, angry}
    pub fn four_class() -> Self {
        Self {
            names: FOUR_CLASS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// {neutral, happy, sad, angry, fear, disgust, surprise}
    pub fn ravdess() -> Self {
        Self {
            names: RAVDESS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Label name at `index`.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Index of `name`, case-insensitive.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        let name = name.trim().to_lowercase();
        self.names.iter().position(|n| *n == name)
    }

    /// Capitalized name for display ("happy" → "Happy").
    pub fn display_name(&self, index: usize) -> Option<String> {
        self.name(index).map(|name| {
            let mut chars = name.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
    }

    /// Iterate `(index, name)` in label order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::four_class()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = ConfigError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.names
    }
}

/// Parses `four-class`, `ravdess` or a comma-separated list.
impl FromStr for LabelSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "four-class" | "4" => Ok(Self::four_class()),
            "ravdess" | "7" => Ok(Self::ravdess()),
            list => Self::new(list.split(',')),
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(","))
    }
}
