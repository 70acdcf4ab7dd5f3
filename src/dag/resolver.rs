// src/dag/resolver.rs

//! Flattening of pre-task declarations into a linear execution order.
//!
//! Every task declares its *direct* pre-tasks by name. Running a task means
//! running all of its transitive pre-tasks first, each exactly once, with
//! every pre-task placed after everything it depends on. The flattening is
//! an explicit depth-first walk with its own stack so that the chain of
//! tasks currently being expanded (the "call stack") is always at hand for
//! cycle reporting.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::model::TaskConfig;

/// Result of [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// For every task index, all transitive pre-tasks in execution order.
    ///
    /// The task itself is never part of its own list. Tasks whose resolution
    /// was abandoned because of a cycle get an empty list.
    pub pre_tasks: Vec<Vec<usize>>,
    /// Human-readable problems found while resolving.
    pub errors: Vec<String>,
}

/// One task being expanded by the depth-first walk.
struct Frame {
    task: usize,
    /// Position of the next direct pre-task to visit.
    next: usize,
}

/// Resolve the pre-task order of every task in `tasks`.
///
/// Unknown pre-task names are reported and skipped; resolution continues for
/// all other references. Every distinct cycle is reported once, however many
/// tasks lead into it, and abandons the resolution of every task that
/// reaches it.
pub fn resolve(tasks: &[TaskConfig]) -> Resolution {
    let index_by_name: HashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut errors = Vec::new();
    let mut direct: Vec<Vec<usize>> = Vec::with_capacity(tasks.len());

    for task in tasks {
        let mut deps = Vec::with_capacity(task.pre_tasks.len());
        for name in &task.pre_tasks {
            match index_by_name.get(name.as_str()) {
                Some(&idx) => deps.push(idx),
                None => errors.push(format!(
                    "task '{}' references task '{}' that does not exist",
                    task.name, name
                )),
            }
        }
        direct.push(deps);
    }

    // Keyed by the sorted member list, so rotations of one cycle collapse.
    let mut reported_cycles: HashSet<Vec<usize>> = HashSet::new();
    let mut pre_tasks = Vec::with_capacity(tasks.len());

    for root in 0..tasks.len() {
        match flatten(root, &direct) {
            Ok(order) => pre_tasks.push(order),
            Err(cycles) => {
                for call_stack in cycles {
                    report_cycle(tasks, root, &call_stack, &mut reported_cycles, &mut errors);
                }
                pre_tasks.push(Vec::new());
            }
        }
    }

    Resolution { pre_tasks, errors }
}

fn report_cycle(
    tasks: &[TaskConfig],
    root: usize,
    call_stack: &[usize],
    reported: &mut HashSet<Vec<usize>>,
    errors: &mut Vec<String>,
) {
    // `call_stack` ends with the repeated task; the cycle starts at its
    // first occurrence.
    let Some((&repeated, walked)) = call_stack.split_last() else {
        return;
    };
    let start = walked.iter().position(|&t| t == repeated).unwrap_or(0);
    let mut members = walked[start..].to_vec();
    members.sort_unstable();

    if !reported.insert(members) {
        debug!(
            task = %tasks[root].name,
            "task leads into an already reported cycle"
        );
        return;
    }

    let chain: Vec<&str> = call_stack
        .iter()
        .map(|&t| tasks[t].name.as_str())
        .collect();
    errors.push(format!(
        "task '{}' has a circular dependency in its dependencies: {}",
        tasks[root].name,
        chain.join(" -> ")
    ));
}

/// Flatten the pre-tasks of `root`.
///
/// On failure, returns every cycle met on the way, each as the call stack
/// with the repeated task appended.
fn flatten(root: usize, direct: &[Vec<usize>]) -> Result<Vec<usize>, Vec<Vec<usize>>> {
    let mut order: Vec<usize> = Vec::new();
    let mut done: HashSet<usize> = HashSet::new();
    let mut cycles: Vec<Vec<usize>> = Vec::new();
    let mut stack = vec![Frame {
        task: root,
        next: 0,
    }];

    while let Some(top) = stack.last_mut() {
        let current = top.task;

        let Some(&dep) = direct[current].get(top.next) else {
            stack.pop();
            done.insert(current);
            if current != root {
                order.push(current);
            }
            continue;
        };
        top.next += 1;

        if done.contains(&dep) {
            continue;
        }
        if stack.iter().any(|f| f.task == dep) {
            let mut call_stack: Vec<usize> = stack.iter().map(|f| f.task).collect();
            call_stack.push(dep);
            cycles.push(call_stack);
            continue;
        }
        stack.push(Frame { task: dep, next: 0 });
    }

    if cycles.is_empty() {
        Ok(order)
    } else {
        Err(cycles)
    }
}
