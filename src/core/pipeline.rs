//! Pipeline definitions and graph validation.
//!
//! A pipeline is a DAG of step instances. Edges are implied by upstream
//! bindings; the builder validates the graph eagerly and fixes a
//! deterministic execution order (Kahn's algorithm, ties broken by
//! declaration order).

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::error::GraphValidationError;
use super::step::{Binding, StepSpec};

/// Collects step instances and validates them into a [`Pipeline`]
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    steps: Vec<StepSpec>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step instance; declaration order breaks execution-order ties
    pub fn step(mut self, spec: StepSpec) -> Self {
        self.steps.push(spec);
        self
    }

    /// Validate the graph and compute the execution order
    pub fn build(self) -> Result<Pipeline, GraphValidationError> {
        let pipeline = self.name;

        if self.steps.is_empty() {
            return Err(GraphValidationError::EmptyPipeline { pipeline });
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, spec) in self.steps.iter().enumerate() {
            if index.insert(spec.name(), i).is_some() {
                return Err(GraphValidationError::DuplicateStep {
                    pipeline,
                    step: spec.name().to_string(),
                });
            }
        }

        for spec in &self.steps {
            validate_ports(&pipeline, spec)?;
        }

        for spec in &self.steps {
            for (input, binding) in spec.bindings() {
                if let Binding::Upstream { step, output } = binding {
                    let resolved = index
                        .get(step.as_str())
                        .map(|&i| self.steps[i].step().outputs().contains(&output.as_str()))
                        .unwrap_or(false);
                    if !resolved {
                        return Err(GraphValidationError::UnresolvedInput {
                            pipeline,
                            step: spec.name().to_string(),
                            input: input.clone(),
                            upstream: step.clone(),
                            output: output.clone(),
                        });
                    }
                }
            }
        }

        let order = topological_order(&pipeline, &self.steps, &index)?;
        debug!(pipeline = %pipeline, steps = order.len(), "Pipeline validated");

        Ok(Pipeline {
            name: pipeline,
            steps: self.steps,
            order,
        })
    }
}

/// Every declared input bound, no stray bindings, unique outputs
fn validate_ports(pipeline: &str, spec: &StepSpec) -> Result<(), GraphValidationError> {
    let declared = spec.step().inputs();

    for input in declared {
        if !spec.bindings().contains_key(*input) {
            return Err(GraphValidationError::UnboundInput {
                pipeline: pipeline.to_string(),
                step: spec.name().to_string(),
                input: input.to_string(),
            });
        }
    }

    for input in spec.bindings().keys() {
        if !declared.contains(&input.as_str()) {
            return Err(GraphValidationError::UnknownInput {
                pipeline: pipeline.to_string(),
                step: spec.name().to_string(),
                input: input.clone(),
            });
        }
    }

    let mut outputs = HashSet::new();
    for output in spec.step().outputs() {
        if !outputs.insert(*output) {
            return Err(GraphValidationError::DuplicateOutput {
                pipeline: pipeline.to_string(),
                step: spec.name().to_string(),
                output: output.to_string(),
            });
        }
    }

    Ok(())
}

fn topological_order(
    pipeline: &str,
    steps: &[StepSpec],
    index: &HashMap<&str, usize>,
) -> Result<Vec<usize>, GraphValidationError> {
    let mut in_degree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, spec) in steps.iter().enumerate() {
        for upstream in spec.upstream_steps() {
            let u = index[upstream];
            dependents[u].push(i);
            in_degree[i] += 1;
        }
    }

    // Smallest declaration index first among ready steps
    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < steps.len() {
        let stuck = (0..steps.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| steps[i].name().to_string())
            .collect();
        return Err(GraphValidationError::Cycle {
            pipeline: pipeline.to_string(),
            steps: stuck,
        });
    }

    Ok(order)
}

/// A validated, immutable pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<StepSpec>,
    order: Vec<usize>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in declaration order
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Steps in execution order
    pub fn execution_order(&self) -> impl Iterator<Item = &StepSpec> {
        self.order.iter().map(|&i| &self.steps[i])
    }

    /// Step names in execution order
    pub fn plan(&self) -> Vec<String> {
        self.execution_order().map(|s| s.name().to_string()).collect()
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name() == name)
    }

    /// Upstream-to-downstream edges, as step names
    pub fn edges(&self) -> Vec<(String, String)> {
        self.steps
            .iter()
            .flat_map(|spec| {
                spec.upstream_steps()
                    .into_iter()
                    .map(|u| (u.to_string(), spec.name().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
