//! Directed acyclic graph of tasks.
//!
//! A [`TaskGraph`] owns its [`TaskNode`]s in insertion order together with
//! the dependency edges between them. The graph is mutated only while it is
//! being built; during a run the engine reads it through [`TaskGraph::ready_set`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::retry::RetryPolicy;
use super::run::{TaskRun, TaskState};
use super::sensor::Sensor;
use super::task::Action;
use super::types::{PipelineId, TaskId};

/// Errors raised while building or validating a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A task with this name already exists.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// An edge names a task that is not in the graph.
    #[error("unknown dependency: task '{from}' depends on non-existent task '{to}'")]
    UnknownDependency { from: TaskId, to: TaskId },

    /// The dependency relation contains a cycle. The path starts and ends on
    /// the same task.
    #[error("cycle detected: {}", format_path(.0))]
    Cycle(Vec<TaskId>),

    /// Task not found in the graph.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// The work a node performs.
#[derive(Clone)]
pub enum TaskKind {
    /// Poll a readiness check until it passes or times out.
    Sensor(Sensor),
    /// Run an action once per attempt.
    Action(Arc<dyn Action>),
}

impl TaskKind {
    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Sensor(_) => "sensor",
            TaskKind::Action(_) => "action",
        }
    }

    /// Description reported by the underlying check or action.
    pub fn description(&self) -> Option<String> {
        match self {
            TaskKind::Sensor(sensor) => sensor.description(),
            TaskKind::Action(action) => action.description(),
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Sensor(sensor) => f.debug_tuple("Sensor").field(sensor).finish(),
            TaskKind::Action(action) => f
                .debug_tuple("Action")
                .field(&action.description())
                .finish(),
        }
    }
}

/// A node in the graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Unique task name.
    pub id: TaskId,

    /// What the task does.
    pub kind: TaskKind,

    /// Tasks that must succeed before this one may start, in declaration order.
    pub dependencies: Vec<TaskId>,

    /// Retry budget and backoff for action attempts.
    pub retry: RetryPolicy,

    /// A failing best-effort task skips its dependents but does not fail the run.
    pub best_effort: bool,
}

impl TaskNode {
    /// Create an action node with no dependencies and no retries.
    pub fn action(id: impl Into<TaskId>, action: Arc<dyn Action>) -> Self {
        Self::new(id, TaskKind::Action(action))
    }

    /// Create a sensor node with no dependencies.
    pub fn sensor(id: impl Into<TaskId>, sensor: Sensor) -> Self {
        Self::new(id, TaskKind::Sensor(sensor))
    }

    fn new(id: impl Into<TaskId>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            dependencies: Vec::new(),
            retry: RetryPolicy::default(),
            best_effort: false,
        }
    }

    /// Builder: add a dependency.
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: mark the task best-effort.
    pub fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// Whether the node is a sensor.
    pub fn is_sensor(&self) -> bool {
        matches!(self.kind, TaskKind::Sensor(_))
    }
}

/// Result of [`TaskGraph::ready_set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadySet {
    /// Pending tasks whose dependencies all succeeded, in insertion order.
    pub runnable: Vec<TaskId>,

    /// Pending tasks with at least one failed or skipped dependency, in
    /// insertion order, each with the offending dependencies.
    pub to_skip: Vec<(TaskId, Vec<TaskId>)>,
}

impl ReadySet {
    /// Whether there is nothing to start or skip.
    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty() && self.to_skip.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// A directed acyclic graph of tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    id: PipelineId,
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new(id: impl Into<PipelineId>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Identifier of the pipeline this graph belongs to.
    pub fn id(&self) -> &PipelineId {
        &self.id
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a task.
    ///
    /// Dependencies carried by the node are not checked here; call
    /// [`validate`](Self::validate) once the graph is complete.
    pub fn add_task(&mut self, node: TaskNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.id) {
            return Err(GraphError::DuplicateTask(node.id));
        }
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Add a dependency: `from` depends on `to`. Both tasks must exist.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<(), GraphError> {
        if !self.index.contains_key(to) {
            return Err(GraphError::UnknownDependency {
                from: from.clone(),
                to: to.clone(),
            });
        }
        let node = self
            .index
            .get(from)
            .and_then(|&i| self.nodes.get_mut(i))
            .ok_or_else(|| GraphError::TaskNotFound(from.clone()))?;

        if !node.dependencies.contains(to) {
            node.dependencies.push(to.clone());
        }
        Ok(())
    }

    /// Look up a task.
    pub fn get(&self, id: &TaskId) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Whether a task exists.
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Direct dependencies of a task.
    pub fn dependencies(&self, id: &TaskId) -> Option<&[TaskId]> {
        self.get(id).map(|n| n.dependencies.as_slice())
    }

    /// Tasks with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Tasks that depend directly on `id`, in insertion order.
    pub fn downstream(&self, id: &TaskId) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies.contains(id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Every task reachable downstream of `id`, in insertion order.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            for next in self.downstream(&current) {
                if seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        self.nodes
            .iter()
            .filter(|n| seen.contains(&n.id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Check that every edge names an existing task and that the graph is acyclic.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for dep in &node.dependencies {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        from: node.id.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        let mut path = Vec::new();
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::White {
                self.visit(start, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        marks[node] = Mark::Gray;
        path.push(node);

        for dep in &self.nodes[node].dependencies {
            let next = self.index[dep];
            match marks[next] {
                Mark::White => self.visit(next, marks, path)?,
                Mark::Gray => {
                    let from = path.iter().position(|&i| i == next).unwrap_or(0);
                    let mut cycle: Vec<TaskId> = path[from..]
                        .iter()
                        .map(|&i| self.nodes[i].id.clone())
                        .collect();
                    cycle.push(self.nodes[next].id.clone());
                    return Err(GraphError::Cycle(cycle));
                }
                Mark::Black => {}
            }
        }

        path.pop();
        marks[node] = Mark::Black;
        Ok(())
    }

    /// Tasks in dependency order, ties broken by insertion order.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        self.validate()?;

        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for dep in &node.dependencies {
                dependents[self.index[dep]].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            order.push(self.nodes[i].id.clone());
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        Ok(order)
    }

    /// Pending tasks that can start now, and pending tasks that must be skipped.
    ///
    /// A task absent from `runs` counts as pending. The result depends only on
    /// the states in `runs` and is in insertion order.
    pub fn ready_set(&self, runs: &HashMap<TaskId, TaskRun>) -> ReadySet {
        let state_of = |id: &TaskId| {
            runs.get(id)
                .map(|r| r.state())
                .unwrap_or(TaskState::Pending)
        };

        let mut ready = ReadySet::default();
        for node in &self.nodes {
            if state_of(&node.id) != TaskState::Pending {
                continue;
            }

            let blocked: Vec<TaskId> = node
                .dependencies
                .iter()
                .filter(|dep| matches!(state_of(dep), TaskState::Failed | TaskState::Skipped))
                .cloned()
                .collect();

            if !blocked.is_empty() {
                ready.to_skip.push((node.id.clone(), blocked));
            } else if node
                .dependencies
                .iter()
                .all(|dep| state_of(dep) == TaskState::Succeeded)
            {
                ready.runnable.push(node.id.clone());
            }
        }
        ready
    }
}
