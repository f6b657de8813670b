//! Step contract and input bindings.
//!
//! A [`Step`] is an opaque computation with declared input and output names.
//! A [`StepSpec`] places a step into a pipeline under an instance name and
//! binds each declared input to an upstream output, a literal, or a run
//! parameter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::StepError;

/// A unit of work in a pipeline.
///
/// Implementations must be deterministic for identical resolved inputs:
/// cached outputs are reused without calling `compute` again. Bump
/// [`Step::version`] whenever the computation changes meaning.
#[async_trait]
pub trait Step: Send + Sync {
    /// Code identity, shared by every instance of this step type
    fn kind(&self) -> &str;

    /// Code version, part of the cache fingerprint
    fn version(&self) -> &str {
        "1"
    }

    /// Whether executions may be served from the cache.
    ///
    /// Steps that read external state (files, services) return `false`: they
    /// run every time and their fingerprint is taken from the content of
    /// their outputs, so downstream steps still cache on unchanged data.
    fn cacheable(&self) -> bool {
        true
    }

    /// Declared input names
    fn inputs(&self) -> &[&str];

    /// Declared output names, in order
    fn outputs(&self) -> &[&str];

    /// Run the computation
    async fn compute(&self, inputs: &StepInputs) -> Result<StepOutputs, StepError>;
}

/// Where an input's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    /// Output of another step in the same run
    Upstream { step: String, output: String },

    /// Fixed value
    Literal(Value),

    /// Run parameter, with an optional fallback
    Param {
        name: String,
        #[serde(default)]
        default: Option<Value>,
    },
}

impl Binding {
    pub fn upstream(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Upstream {
            step: step.into(),
            output: output.into(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Param {
            name: name.into(),
            default: None,
        }
    }

    pub fn param_or(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self::Param {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    /// Upstream step this binding depends on
    pub fn upstream_step(&self) -> Option<&str> {
        match self {
            Self::Upstream { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// A step instance: name, implementation and input bindings
#[derive(Clone)]
pub struct StepSpec {
    pub(crate) name: String,
    pub(crate) step: Arc<dyn Step>,
    pub(crate) bindings: BTreeMap<String, Binding>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, step: impl Step + 'static) -> Self {
        Self::from_arc(name, Arc::new(step))
    }

    pub fn from_arc(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
            bindings: BTreeMap::new(),
        }
    }

    /// Bind an input; a later binding for the same input replaces the earlier one
    pub fn input(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.bindings
    }

    /// Names of steps this instance reads from, deduplicated
    pub fn upstream_steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = self
            .bindings
            .values()
            .filter_map(Binding::upstream_step)
            .collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("kind", &self.step.kind())
            .field("version", &self.step.version())
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Resolved input values handed to [`Step::compute`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInputs {
    /// Values read from upstream artifacts
    pub artifacts: BTreeMap<String, Value>,

    /// Literal and run-parameter values
    pub params: BTreeMap<String, Value>,
}

impl StepInputs {
    /// Raw value of an input, wherever it was bound
    pub fn value(&self, name: &str) -> Result<&Value, StepError> {
        self.artifacts
            .get(name)
            .or_else(|| self.params.get(name))
            .ok_or_else(|| StepError::MissingInput(name.to_string()))
    }

    /// Deserialize an input into a typed value
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, StepError> {
        let value = self.value(name)?;
        T::deserialize(value).map_err(|e| StepError::invalid(name, e))
    }

    /// Like [`StepInputs::get`], but `null` or an absent input yields `None`
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StepError> {
        match self.value(name) {
            Ok(Value::Null) | Err(StepError::MissingInput(_)) => Ok(None),
            Ok(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| StepError::invalid(name, e)),
            Err(e) => Err(e),
        }
    }
}

/// Named output values returned by [`Step::compute`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    values: BTreeMap<String, Value>,
}

impl StepOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and add an output
    pub fn with<T: Serialize>(mut self, name: &str, value: &T) -> Result<Self, StepError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StepError::failed(format!("cannot serialize output '{}': {}", name, e)))?;
        self.values.insert(name.to_string(), value);
        Ok(self)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }
}
