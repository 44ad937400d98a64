//! DAG validation and wave partitioning for the Task Runner/Scheduler
//! (spec §4.8, component C8). Runs once, before any Commander session is
//! opened, so a malformed mission definition fails with no side effects
//! at all (spec §8 scenario 6: "the mission is rejected before any
//! sessions are created").

use std::collections::{HashMap, HashSet};

use crate::config::MissionDef;
use crate::error::RuntimeError;

/// Validates that every `depends_on`/`agents`/dataset reference in
/// `mission` resolves, that there are no duplicate task names, and that
/// the dependency graph is acyclic.
pub fn validate(
    mission: &MissionDef,
    known_agents: &HashSet<String>,
    known_datasets: &HashSet<String>,
) -> Result<(), RuntimeError> {
    let names: HashSet<&str> = mission.tasks.iter().map(|t| t.name.as_str()).collect();
    if names.len() != mission.tasks.len() {
        return Err(RuntimeError::Config("duplicate task name in mission definition".to_string()));
    }

    if !known_agents.contains(&mission.commander) {
        return Err(RuntimeError::UnknownReference(format!(
            "mission commander model `{}` is not a configured agent",
            mission.commander
        )));
    }
    for a in &mission.agents {
        if !known_agents.contains(a) {
            return Err(RuntimeError::UnknownReference(format!("mission references unknown default agent `{a}`")));
        }
    }

    for task in &mission.tasks {
        for dep in &task.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(RuntimeError::UnknownReference(format!(
                    "task `{}` depends on unknown task `{dep}`",
                    task.name
                )));
            }
        }
        if let Some(agents) = &task.agents {
            for a in agents {
                if !known_agents.contains(a) {
                    return Err(RuntimeError::UnknownReference(format!(
                        "task `{}` references unknown agent `{a}`",
                        task.name
                    )));
                }
            }
        }
        if let Some(iter) = &task.iterator {
            if !known_datasets.contains(&iter.dataset) {
                return Err(RuntimeError::UnknownReference(format!(
                    "task `{}` iterates over unknown dataset `{}`",
                    task.name, iter.dataset
                )));
            }
        }
    }

    waves(mission)?;
    Ok(())
}

/// Partitions every task into waves by longest-path depth from a root
/// (spec §4.8 "tasks whose dependencies are all satisfied run
/// concurrently, in waves"). Detects cycles along the way.
pub fn waves(mission: &MissionDef) -> Result<Vec<Vec<String>>, RuntimeError> {
    let by_name: HashMap<&str, _> = mission.tasks.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut depth: HashMap<&str, i64> = HashMap::new();
    let mut visiting: HashSet<&str> = HashSet::new();

    for task in &mission.tasks {
        compute_depth(&task.name, &by_name, &mut depth, &mut visiting)?;
    }

    let max_depth = depth.values().copied().max().unwrap_or(-1);
    let mut out: Vec<Vec<String>> = vec![Vec::new(); (max_depth + 1).max(0) as usize];
    for task in &mission.tasks {
        let d = depth[task.name.as_str()];
        out[d as usize].push(task.name.clone());
    }
    Ok(out)
}

fn compute_depth<'a>(
    name: &'a str,
    by_name: &HashMap<&'a str, &'a crate::config::TaskDef>,
    depth: &mut HashMap<&'a str, i64>,
    visiting: &mut HashSet<&'a str>,
) -> Result<i64, RuntimeError> {
    if let Some(d) = depth.get(name) {
        return Ok(*d);
    }
    if !visiting.insert(name) {
        let mut cycle: Vec<String> = visiting.iter().map(|s| s.to_string()).collect();
        cycle.sort();
        return Err(RuntimeError::CycleDetected(cycle));
    }

    let task = by_name.get(name).expect("reference validated before wave computation");
    let mut max_dep_depth = -1i64;
    for dep in &task.depends_on {
        let d = compute_depth(dep, by_name, depth, visiting)?;
        max_dep_depth = max_dep_depth.max(d);
    }
    visiting.remove(name);
    let d = max_dep_depth + 1;
    depth.insert(name, d);
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskDef;
    use std::collections::HashSet;

    fn task(name: &str, depends_on: &[&str]) -> TaskDef {
        TaskDef {
            name: name.to_string(),
            objective: "do it".to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            agents: None,
            output_schema: None,
            iterator: None,
        }
    }

    fn mission(tasks: Vec<TaskDef>) -> MissionDef {
        MissionDef {
            commander: "default".to_string(),
            agents: vec![],
            inputs: Default::default(),
            datasets: vec![],
            tasks,
        }
    }

    #[test]
    fn linear_chain_produces_one_task_per_wave() {
        let m = mission(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        let w = waves(&m).unwrap();
        assert_eq!(w, vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn independent_tasks_share_a_wave() {
        let m = mission(vec![task("a", &[]), task("b", &[])]);
        let w = waves(&m).unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].len(), 2);
    }

    #[test]
    fn cycle_is_rejected() {
        let m = mission(vec![task("a", &["b"]), task("b", &["a"])]);
        let err = waves(&m).unwrap_err();
        assert!(matches!(err, RuntimeError::CycleDetected(_)));
    }

    #[test]
    fn unknown_dependency_is_rejected_before_waves_are_even_attempted() {
        let known_agents = HashSet::from(["default".to_string()]);
        let known_datasets = HashSet::new();
        let m = mission(vec![task("a", &["ghost"])]);
        let err = validate(&m, &known_agents, &known_datasets).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownReference(_)));
    }
}
