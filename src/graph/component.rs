//! Deployable components as handed to the engine

use crate::error::{ConvoyError, ConvoyResult};
use crate::store::SourceDescriptor;
use serde::{Deserialize, Serialize};

/// A named unit of deployment (container build, IaC module, chart release...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique within a run; also used as the workspace directory name
    pub name: String,

    /// Free-form type tag interpreted by the caller's handler
    #[serde(rename = "type")]
    pub kind: String,

    /// Names of components that must succeed first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Where the component's files come from, if it has any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,

    /// Opaque settings passed through to the handler
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Component {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            dependencies: Vec::new(),
            source: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Builder: add dependencies
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Builder: set source
    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.source = Some(source);
        self
    }

    /// Builder: set payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Check that `name` is usable as a single directory name
pub fn validate_name(name: &str) -> ConvoyResult<()> {
    let invalid = |reason: &str| ConvoyError::InvalidComponentName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(&format!("character {:?} is not allowed", c)));
    }
    Ok(())
}
