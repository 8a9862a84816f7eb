//! Phase graph validation and step planning.
//!
//! The builder takes the declared phase list, checks the dependency graph
//! and turns it into an ordered list of [`Step`]s: a lone phase, or a group
//! whose members run concurrently. Steps keep declared order; a group's step
//! sits at the position of its first member.

use crate::errors::OrchestratorError;
use crate::phase::Phase;
use std::collections::{HashMap, HashSet};

/// Index into the phase list.
pub type PhaseIndex = usize;

/// One unit of sequential progress through a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Single(Phase),
    Group { name: String, members: Vec<Phase> },
}

impl Step {
    pub fn phases(&self) -> &[Phase] {
        match self {
            Step::Single(phase) => std::slice::from_ref(phase),
            Step::Group { members, .. } => members,
        }
    }

    /// Phase name for a single step, group name for a group.
    pub fn label(&self) -> &str {
        match self {
            Step::Single(phase) => &phase.name,
            Step::Group { name, .. } => name,
        }
    }

    pub fn group(&self) -> Option<&str> {
        match self {
            Step::Single(_) => None,
            Step::Group { name, .. } => Some(name),
        }
    }
}

/// A validated phase graph.
#[derive(Debug)]
pub struct PhaseGraph {
    phases: Vec<Phase>,
    index_map: HashMap<String, PhaseIndex>,
    /// index -> phases that depend on it
    forward_edges: Vec<Vec<PhaseIndex>>,
    /// index -> phases it depends on
    reverse_edges: Vec<Vec<PhaseIndex>>,
    steps: Vec<Step>,
}

impl PhaseGraph {
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn get(&self, name: &str) -> Option<&Phase> {
        self.index_map.get(name).and_then(|&i| self.phases.get(i))
    }

    pub fn dependents(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// Builder for constructing phase graphs.
pub struct GraphBuilder {
    phases: Vec<Phase>,
    external: HashSet<String>,
}

impl GraphBuilder {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self {
            phases,
            external: HashSet::new(),
        }
    }

    /// Names that may be depended on without being part of this graph.
    ///
    /// Used when running a subset of a workflow: the runner checks such
    /// dependencies against the audit log at run time.
    pub fn allow_external<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external.extend(names.into_iter().map(Into::into));
        self
    }

    /// Validate and plan.
    ///
    /// Rejects duplicate names, unknown dependencies, cycles, members of one
    /// group that depend on each other, and dependencies on a phase whose step
    /// comes later.
    pub fn build(self) -> Result<PhaseGraph, OrchestratorError> {
        let mut index_map = HashMap::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if index_map.insert(phase.name.clone(), i).is_some() {
                return Err(invalid(format!("Duplicate phase name: {}", phase.name)));
            }
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];

        for (to_idx, phase) in self.phases.iter().enumerate() {
            for dep in &phase.depends_on {
                match index_map.get(dep) {
                    Some(&from_idx) => {
                        forward_edges[from_idx].push(to_idx);
                        reverse_edges[to_idx].push(from_idx);
                    }
                    None if self.external.contains(dep) => {}
                    None => {
                        return Err(invalid(format!(
                            "Unknown dependency '{}' in phase '{}': no phase with that name exists",
                            dep, phase.name
                        )));
                    }
                }
            }
        }

        let mut graph = PhaseGraph {
            phases: self.phases,
            index_map,
            forward_edges,
            reverse_edges,
            steps: Vec::new(),
        };

        Self::validate_no_cycles(&graph)?;
        Self::validate_groups(&graph)?;
        graph.steps = Self::plan_steps(&graph)?;
        Ok(graph)
    }

    /// Kahn's algorithm.
    fn validate_no_cycles(graph: &PhaseGraph) -> Result<(), OrchestratorError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(Vec::len).collect();
        let mut queue: Vec<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        while let Some(node) = queue.pop() {
            processed += 1;
            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let cycle_phases: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| graph.phases[i].name.as_str())
                .collect();
            return Err(invalid(format!(
                "Cycle detected in phase dependencies. Involved phases: {:?}",
                cycle_phases
            )));
        }
        Ok(())
    }

    fn validate_groups(graph: &PhaseGraph) -> Result<(), OrchestratorError> {
        for (idx, phase) in graph.phases.iter().enumerate() {
            let Some(group) = &phase.group else {
                continue;
            };
            for &dep in graph.dependencies(idx) {
                if graph.phases[dep].group.as_ref() == Some(group) {
                    return Err(invalid(format!(
                        "Phase '{}' depends on '{}' but both are in group '{}'; group members must be independent",
                        phase.name, graph.phases[dep].name, group
                    )));
                }
            }
        }
        Ok(())
    }

    fn plan_steps(graph: &PhaseGraph) -> Result<Vec<Step>, OrchestratorError> {
        let mut steps: Vec<Step> = Vec::new();
        let mut group_step: HashMap<&str, usize> = HashMap::new();
        let mut step_of: Vec<usize> = vec![0; graph.len()];

        for (idx, phase) in graph.phases.iter().enumerate() {
            match &phase.group {
                None => {
                    step_of[idx] = steps.len();
                    steps.push(Step::Single(phase.clone()));
                }
                Some(group) => match group_step.get(group.as_str()) {
                    Some(&step_idx) => {
                        step_of[idx] = step_idx;
                        if let Step::Group { members, .. } = &mut steps[step_idx] {
                            members.push(phase.clone());
                        }
                    }
                    None => {
                        step_of[idx] = steps.len();
                        group_step.insert(group.as_str(), steps.len());
                        steps.push(Step::Group {
                            name: group.clone(),
                            members: vec![phase.clone()],
                        });
                    }
                },
            }
        }

        for (idx, phase) in graph.phases.iter().enumerate() {
            for &dep in graph.dependencies(idx) {
                if step_of[dep] > step_of[idx] {
                    return Err(invalid(format!(
                        "Phase '{}' depends on '{}', which is scheduled after it; declare '{}' earlier",
                        phase.name, graph.phases[dep].name, graph.phases[dep].name
                    )));
                }
            }
        }

        Ok(steps)
    }
}

fn invalid(message: String) -> OrchestratorError {
    OrchestratorError::InvalidGraph(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(name: &str, deps: &[&str]) -> Phase {
        Phase::shell(name, "true").depends_on(deps)
    }

    fn labels(graph: &PhaseGraph) -> Vec<&str> {
        graph.steps().iter().map(Step::label).collect()
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = GraphBuilder::new(vec![
            phase("plan", &[]),
            phase("build", &["plan"]),
            phase("test", &["build"]),
        ])
        .build()
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(labels(&graph), vec!["plan", "build", "test"]);
        assert_eq!(graph.dependencies(2), &[1]);
        assert_eq!(graph.dependents(0), &[1]);
        assert!(graph.get("build").is_some());
    }

    #[test]
    fn test_group_step_sits_at_first_member() {
        let graph = GraphBuilder::new(vec![
            phase("plan", &[]),
            phase("api", &["plan"]).in_group("impl"),
            phase("docs", &["plan"]),
            phase("ui", &["plan"]).in_group("impl"),
            phase("ship", &["api", "ui", "docs"]),
        ])
        .build()
        .unwrap();

        assert_eq!(labels(&graph), vec!["plan", "impl", "docs", "ship"]);
        let members: Vec<&str> = graph.steps()[1]
            .phases()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(members, vec!["api", "ui"]);
        assert_eq!(graph.steps()[1].group(), Some("impl"));
    }

    #[test]
    fn test_cycle_detection() {
        let result = GraphBuilder::new(vec![
            phase("a", &["c"]),
            phase("b", &["a"]),
            phase("c", &["b"]),
        ])
        .build();

        let err = result.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidGraph(_)));
        assert!(err.to_string().contains("Cycle"));
    }

    #[test]
    fn test_missing_dependency() {
        let err = GraphBuilder::new(vec![phase("a", &["nonexistent"])])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_external_dependency_is_allowed() {
        let graph = GraphBuilder::new(vec![phase("test", &["build"])])
            .allow_external(["build"])
            .build()
            .unwrap();
        assert!(graph.dependencies(0).is_empty());
    }

    #[test]
    fn test_duplicate_phase_name() {
        let err = GraphBuilder::new(vec![phase("a", &[]), phase("a", &[])])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_intra_group_dependency_is_rejected() {
        let err = GraphBuilder::new(vec![
            phase("a", &[]).in_group("g"),
            phase("b", &["a"]).in_group("g"),
        ])
        .build()
        .unwrap_err();
        assert!(err.to_string().contains("independent"));
    }

    #[test]
    fn test_dependency_on_later_step_is_rejected() {
        let err = GraphBuilder::new(vec![phase("deploy", &["build"]), phase("build", &[])])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("scheduled after"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.steps().is_empty());
    }
}
