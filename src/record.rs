//! Records submitted for vectorization and the per-class rendering options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A caller-owned unit of work.
///
/// The record's position in the slice handed to `Scheduler::submit` is its
/// index for the lifetime of that call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Class (type) the record belongs to
    pub class: String,

    /// Property bag
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Record {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            properties: Map::new(),
        }
    }

    /// Add a property to the record
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Options controlling how a record of a class is turned into text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Prefix the text with the class name
    #[serde(default)]
    pub vectorize_class_name: bool,

    /// Prefix each property value with the property name
    #[serde(default)]
    pub vectorize_property_name: bool,

    /// Lowercase the rendered text
    #[serde(default)]
    pub lowercase: bool,

    /// Only these properties are rendered; all string properties when `None`
    #[serde(default)]
    pub properties: Option<Vec<String>>,
}

impl ClassConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vectorize_class_name(mut self, enabled: bool) -> Self {
        self.vectorize_class_name = enabled;
        self
    }

    pub fn vectorize_property_name(mut self, enabled: bool) -> Self {
        self.vectorize_property_name = enabled;
        self
    }

    pub fn lowercase(mut self, enabled: bool) -> Self {
        self.lowercase = enabled;
        self
    }

    /// Restrict rendering to the given properties
    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a property takes part in rendering
    pub fn includes(&self, property: &str) -> bool {
        self.properties
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|p| p == property))
    }
}
