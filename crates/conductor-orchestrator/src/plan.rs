use crate::workflow::WorkflowDefinition;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;

/// Progress of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Waiting on dependencies.
    Pending,
    /// Dispatched.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never attempted because a dependency did not complete.
    Skipped,
}

impl StepState {
    fn is_terminal(self) -> bool {
        !matches!(self, StepState::Pending | StepState::Running)
    }
}

/// Dependency graph of one workflow execution.
///
/// A step becomes ready once all of its dependencies have completed; ready
/// steps are returned in declaration order.
#[derive(Debug)]
pub struct ExecutionPlan {
    order: Vec<String>,
    deps: HashMap<String, Vec<String>>,
    states: HashMap<String, StepState>,
}

impl ExecutionPlan {
    /// Builds the plan, rejecting unknown dependencies and cycles.
    pub fn new(workflow: &WorkflowDefinition) -> ConductorResult<Self> {
        let order: Vec<String> = workflow.steps.iter().map(|s| s.id.clone()).collect();
        let deps: HashMap<String, Vec<String>> = workflow
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect();

        for step in &workflow.steps {
            if let Some(missing) = step.depends_on.iter().find(|d| !deps.contains_key(*d)) {
                return Err(ConductorError::Validation(format!(
                    "step '{}' depends on unknown step '{missing}'",
                    step.id
                )));
            }
        }

        let plan = Self {
            states: order.iter().map(|id| (id.clone(), StepState::Pending)).collect(),
            order,
            deps,
        };
        if let Some(cycle) = plan.find_cycle() {
            return Err(ConductorError::WorkflowCycle(format!(
                "workflow '{}' has a dependency cycle: {}",
                workflow.id,
                cycle.join(" -> ")
            )));
        }
        Ok(plan)
    }

    /// Pending steps whose dependencies have all completed.
    pub fn ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.state(id) == Some(StepState::Pending))
            .filter(|id| {
                self.deps[*id]
                    .iter()
                    .all(|d| self.state(d) == Some(StepState::Completed))
            })
            .cloned()
            .collect()
    }

    /// State of a step.
    pub fn state(&self, id: &str) -> Option<StepState> {
        self.states.get(id).copied()
    }

    fn set(&mut self, id: &str, state: StepState) -> bool {
        match self.states.get_mut(id) {
            Some(current) => {
                *current = state;
                true
            }
            None => false,
        }
    }

    /// Marks a step as dispatched.
    pub fn mark_running(&mut self, id: &str) -> bool {
        self.set(id, StepState::Running)
    }

    /// Marks a step as completed.
    pub fn mark_completed(&mut self, id: &str) -> bool {
        self.set(id, StepState::Completed)
    }

    /// Marks a step as failed and skips everything downstream of it.
    /// Returns the skipped step ids in declaration order.
    pub fn mark_failed(&mut self, id: &str) -> Vec<String> {
        if !self.set(id, StepState::Failed) {
            return Vec::new();
        }
        let mut skipped = Vec::new();
        loop {
            let blocked: Vec<String> = self
                .order
                .iter()
                .filter(|s| self.state(s) == Some(StepState::Pending))
                .filter(|s| {
                    self.deps[*s].iter().any(|d| {
                        matches!(self.state(d), Some(StepState::Failed | StepState::Skipped))
                    })
                })
                .cloned()
                .collect();
            if blocked.is_empty() {
                break;
            }
            for step in blocked {
                self.set(&step, StepState::Skipped);
                skipped.push(step);
            }
        }
        skipped.sort_by_key(|s| self.position(s));
        skipped
    }

    fn position(&self, id: &str) -> usize {
        self.order.iter().position(|s| s == id).unwrap_or(usize::MAX)
    }

    /// Steps in `state`.
    pub fn count(&self, state: StepState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    /// Whether every step reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.states.values().all(|s| s.is_terminal())
    }

    /// Step ids in a dependency-respecting order.
    pub fn topological_order(&self) -> Vec<String> {
        let mut emitted: Vec<String> = Vec::with_capacity(self.order.len());
        while emitted.len() < self.order.len() {
            let before = emitted.len();
            for id in &self.order {
                if emitted.contains(id) {
                    continue;
                }
                if self.deps[id].iter().all(|d| emitted.contains(d)) {
                    emitted.push(id.clone());
                }
            }
            // Unreachable for a validated plan.
            if emitted.len() == before {
                break;
            }
        }
        emitted
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashMap<&str, u8> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        for id in &self.order {
            if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashMap<&'a str, u8>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match visited.get(id) {
            // back edge
            Some(1) => {
                let start = path.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            Some(2) => return None,
            _ => {}
        }
        visited.insert(id, 1);
        path.push(id);
        if let Some(deps) = self.deps.get(id) {
            for dep in deps {
                if let Some(cycle) = self.dfs_cycle(dep, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        visited.insert(id, 2);
        None
    }
}
