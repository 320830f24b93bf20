// tests/scheduler_properties.rs

use std::collections::HashSet;

use proptest::prelude::*;
use dagrun::dag::{Scheduler, SkipCause, TaskGraph, TaskState};
use dagrun::engine::{FailureReason, TaskOutcome};
use dagrun_test_utils::builders::TaskGraphBuilder;

// Strategy to generate a valid DAG.
// We ensure acyclicity by only allowing task N to depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = TaskGraph> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_tasks,
        );

        deps_strat.prop_map(move |raw_deps| {
            let mut builder = TaskGraphBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                let deps: Vec<String> = if i == 0 {
                    Vec::new()
                } else {
                    potential_deps
                        .into_iter()
                        .map(|d| format!("task_{}", d % i))
                        .collect()
                };
                let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                builder = builder.with_task(&format!("task_{i}"), &dep_refs);
            }
            builder.build()
        })
    })
}

fn ancestors(graph: &TaskGraph, task: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = vec![task];
    while let Some(current) = stack.pop() {
        for dep in graph.dependencies_of(current) {
            if seen.insert(dep.clone()) {
                stack.push(dep);
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn scheduler_terminates_and_keeps_invariants(
        graph in dag_strategy(12),
        concurrency in 1..4usize,
        failing in proptest::collection::hash_set(0..12usize, 0..4),
        picks in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let failing: HashSet<String> = failing.iter().map(|i| format!("task_{i}")).collect();
        let reference = graph.clone();
        let mut scheduler = Scheduler::new(graph, concurrency).unwrap();

        let mut executing: Vec<String> = scheduler
            .step_admit()
            .unwrap()
            .newly_scheduled
            .into_iter()
            .map(|t| t.name)
            .collect();

        let mut steps = 0;
        while !executing.is_empty() {
            steps += 1;
            prop_assert!(steps <= reference.len(), "more completions than tasks");
            prop_assert!(executing.len() <= concurrency);
            prop_assert_eq!(scheduler.running_count(), executing.len());

            let pick = picks[steps % picks.len()] % executing.len();
            let task = executing.remove(pick);

            let outcome = if failing.contains(&task) {
                TaskOutcome::Failed(FailureReason::NonZeroExit(1))
            } else {
                TaskOutcome::Succeeded
            };

            let step = scheduler.step_completion(&task, outcome).unwrap();
            for scheduled in step.newly_scheduled {
                // Never admitted before every dependency succeeded.
                for dep in reference.dependencies_of(&scheduled.name) {
                    prop_assert_eq!(scheduler.state_of(dep), Some(TaskState::Succeeded));
                }
                executing.push(scheduled.name);
            }
            for (skipped, cause) in step.newly_skipped {
                match cause {
                    SkipCause::Upstream(upstream) => {
                        prop_assert!(ancestors(&reference, &skipped).contains(&upstream));
                    }
                    SkipCause::Shutdown => prop_assert!(false, "no shutdown in this run"),
                }
            }
        }

        prop_assert!(scheduler.is_finished(), "run stalled with nothing executing");

        // Skipped exactly when some ancestor failed.
        for name in reference.task_names() {
            let state = scheduler.state_of(name).unwrap();
            let failed_ancestor = ancestors(&reference, name)
                .iter()
                .any(|a| failing.contains(a));

            if failed_ancestor {
                prop_assert_eq!(state, TaskState::Skipped, "task {}", name);
            } else if failing.contains(name) {
                prop_assert_eq!(state, TaskState::Failed, "task {}", name);
            } else {
                prop_assert_eq!(state, TaskState::Succeeded, "task {}", name);
            }
        }
    }
}
