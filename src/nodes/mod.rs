// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Node types exposed to a host graph runtime

pub mod library;
pub mod scraper;
pub mod video;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::library::Library;
use crate::scraper::SessionManager;
use crate::video::FrameBatch;
use crate::{Result, StockpileError};

/// Kind and bounds of a node input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputKind {
    Images,
    Text,
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64, step: f64 },
    Choice { options: Vec<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct InputSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: InputKind,
    /// Filled in when the caller leaves the input unset
    pub default: Option<Value>,
    pub optional: bool,
    pub tooltip: &'static str,
}

impl InputSpec {
    pub fn images(name: &'static str, tooltip: &'static str) -> Self {
        Self { name, kind: InputKind::Images, default: None, optional: false, tooltip }
    }

    pub fn optional_images(name: &'static str, tooltip: &'static str) -> Self {
        Self { optional: true, ..Self::images(name, tooltip) }
    }

    pub fn text(name: &'static str, default: &str, tooltip: &'static str) -> Self {
        Self {
            name,
            kind: InputKind::Text,
            default: Some(Value::from(default)),
            optional: false,
            tooltip,
        }
    }

    pub fn int(
        name: &'static str,
        default: i64,
        min: i64,
        max: i64,
        tooltip: &'static str,
    ) -> Self {
        Self {
            name,
            kind: InputKind::Int { min, max },
            default: Some(Value::from(default)),
            optional: false,
            tooltip,
        }
    }

    pub fn float(
        name: &'static str,
        default: f64,
        min: f64,
        max: f64,
        step: f64,
        tooltip: &'static str,
    ) -> Self {
        Self {
            name,
            kind: InputKind::Float { min, max, step },
            default: Some(Value::from(default)),
            optional: false,
            tooltip,
        }
    }

    pub fn choice(
        name: &'static str,
        options: &[&str],
        default: &str,
        tooltip: &'static str,
    ) -> Self {
        Self {
            name,
            kind: InputKind::Choice { options: options.iter().map(|o| o.to_string()).collect() },
            default: Some(Value::from(default)),
            optional: false,
            tooltip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Images,
    Text,
    Int,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSpec {
    pub name: &'static str,
    pub kind: OutputKind,
}

/// Self-description a host uses to build its node palette
#[derive(Debug, Clone, Serialize)]
pub struct NodeSchema {
    pub node_id: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

/// A node output
#[derive(Debug, Clone)]
pub enum NodeValue {
    Images(FrameBatch),
    Text(String),
    Int(i64),
}

impl NodeValue {
    pub fn kind(&self) -> OutputKind {
        match self {
            NodeValue::Images(_) => OutputKind::Images,
            NodeValue::Text(_) => OutputKind::Text,
            NodeValue::Int(_) => OutputKind::Int,
        }
    }

    pub fn into_images(self) -> Option<FrameBatch> {
        match self {
            NodeValue::Images(frames) => Some(frames),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            NodeValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Widget values plus connected image batches
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    values: Map<String, Value>,
    batches: HashMap<String, FrameBatch>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widget values from a JSON object; other documents are rejected
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values, batches: HashMap::new() }),
            Value::Null => Ok(Self::new()),
            _ => Err(StockpileError::Validation("Node inputs must be a JSON object".to_string())),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn with_images(mut self, name: &str, frames: FrameBatch) -> Self {
        self.batches.insert(name.to_string(), frames);
        self
    }

    fn missing(name: &str) -> StockpileError {
        StockpileError::Validation(format!("Missing input: {}", name))
    }

    fn wrong_type(name: &str, expected: &str) -> StockpileError {
        StockpileError::Validation(format!("Input {} must be {}", name, expected))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        self.values
            .get(name)
            .ok_or_else(|| Self::missing(name))?
            .as_str()
            .ok_or_else(|| Self::wrong_type(name, "a string"))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.values
            .get(name)
            .ok_or_else(|| Self::missing(name))?
            .as_i64()
            .ok_or_else(|| Self::wrong_type(name, "an integer"))
    }

    /// Non-negative integer input as a count or index
    pub fn count(&self, name: &str) -> Result<usize> {
        usize::try_from(self.int(name)?).map_err(|_| Self::wrong_type(name, "non-negative"))
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        self.values
            .get(name)
            .ok_or_else(|| Self::missing(name))?
            .as_f64()
            .ok_or_else(|| Self::wrong_type(name, "a number"))
    }

    pub fn images(&self, name: &str) -> Result<&FrameBatch> {
        self.batches.get(name).ok_or_else(|| Self::missing(name))
    }

    pub fn optional_images(&self, name: &str) -> Option<&FrameBatch> {
        self.batches.get(name)
    }

    /// Fill defaults from the schema, then check presence and bounds
    pub fn resolve(mut self, schema: &NodeSchema) -> Result<Self> {
        for spec in &schema.inputs {
            if spec.kind == InputKind::Images {
                if !spec.optional && !self.batches.contains_key(spec.name) {
                    return Err(Self::missing(spec.name));
                }
                continue;
            }
            if !self.values.contains_key(spec.name) {
                match &spec.default {
                    Some(default) => {
                        self.values.insert(spec.name.to_string(), default.clone());
                    }
                    None if spec.optional => continue,
                    None => return Err(Self::missing(spec.name)),
                }
            }
            self.check(spec)?;
        }
        Ok(self)
    }

    fn check(&self, spec: &InputSpec) -> Result<()> {
        match &spec.kind {
            InputKind::Int { min, max } => {
                let v = self.int(spec.name)?;
                if v < *min || v > *max {
                    return Err(StockpileError::Validation(format!(
                        "Input {} = {} is outside {}..={}",
                        spec.name, v, min, max
                    )));
                }
            }
            InputKind::Float { min, max, .. } => {
                let v = self.float(spec.name)?;
                if v < *min || v > *max {
                    return Err(StockpileError::Validation(format!(
                        "Input {} = {} is outside {}..={}",
                        spec.name, v, min, max
                    )));
                }
            }
            InputKind::Choice { options } => {
                let v = self.text(spec.name)?;
                if !options.iter().any(|o| o == v) {
                    return Err(StockpileError::Validation(format!(
                        "Input {} = '{}' is not one of {:?}",
                        spec.name, v, options
                    )));
                }
            }
            InputKind::Text => {
                self.text(spec.name)?;
            }
            InputKind::Images => {}
        }
        Ok(())
    }
}

/// What a node can reach while executing
#[derive(Clone)]
pub struct NodeContext {
    pub library: Library,
    pub sessions: SessionManager,
}

/// A node of the host graph
#[async_trait]
pub trait Node: Send + Sync {
    fn schema(&self) -> NodeSchema;

    /// Run with inputs already resolved against `schema()`
    async fn execute(&self, ctx: &NodeContext, inputs: &NodeInputs) -> Result<Vec<NodeValue>>;
}

/// Every node this crate provides
pub struct NodeRegistry {
    nodes: Vec<Box<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        let mut registry = Self { nodes: Vec::new() };
        registry.register(Box::new(library::LoadImageFromLibrary));
        registry.register(Box::new(library::SearchImageLibrary));
        registry.register(Box::new(scraper::WebScraper));
        registry.register(Box::new(video::VideoStitchInterpolator));
        registry.register(Box::new(video::VideoStitchMultiple));
        registry.register(Box::new(video::VideoFrameBlender));
        registry.register(Box::new(video::VideoLoopSeamless));
        registry
    }

    pub fn register(&mut self, node: Box<dyn Node>) {
        self.nodes.push(node);
    }

    pub fn find(&self, node_id: &str) -> Option<&dyn Node> {
        self.nodes
            .iter()
            .find(|n| n.schema().node_id == node_id)
            .map(|n| n.as_ref())
    }

    pub fn schemas(&self) -> Vec<NodeSchema> {
        self.nodes.iter().map(|n| n.schema()).collect()
    }

    pub fn node_ids(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|n| n.schema().node_id).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve inputs against the node's schema and execute it
    pub async fn run(
        &self,
        node_id: &str,
        ctx: &NodeContext,
        inputs: NodeInputs,
    ) -> Result<Vec<NodeValue>> {
        let node = self
            .find(node_id)
            .ok_or_else(|| StockpileError::NotFound(format!("Unknown node: {}", node_id)))?;
        let schema = node.schema();
        let inputs = inputs.resolve(&schema)?;
        debug!("Executing node {}", node_id);
        let outputs = node.execute(ctx, &inputs).await?;
        debug_assert_eq!(
            outputs.iter().map(NodeValue::kind).collect::<Vec<_>>(),
            schema.outputs.iter().map(|o| o.kind).collect::<Vec<_>>()
        );
        Ok(outputs)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
