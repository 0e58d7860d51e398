//! End-to-end tests of the workflow engine.

use std::fs;

use anadama::engine::{RunOptions, Workflow, WorkflowOptions};
use anadama::task::ActionUnit;
use anadama::tracked::{self, Tracked};
use anadama::backend::memory_backend;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn workflow() -> Workflow {
    Workflow::new(WorkflowOptions { storage_backend: Some(memory_backend()), ..WorkflowOptions::default() })
}

#[tokio::test]
async fn runs_a_linear_pipeline_of_file_tasks() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");

    let mut wf = workflow();
    wf.add_task(
        vec![ActionUnit::Shell(format!("echo one > {}", a.display()))],
        Vec::new(),
        vec![tracked::file(&a)],
        Some("write-a".into()),
    )
    .unwrap();
    wf.add_task(
        vec![ActionUnit::Shell(format!("cat {} > {}", a.display(), b.display()))],
        vec![tracked::file(&a)],
        vec![tracked::file(&b)],
        Some("write-b".into()),
    )
    .unwrap();

    let summary = wf.run(RunOptions::default()).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(fs::read_to_string(&b).unwrap(), "one\n");
}

#[tokio::test]
async fn until_task_restricts_run_to_ancestors() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let unrelated = dir.path().join("unrelated.txt");

    let mut wf = workflow();
    wf.add_task(vec![ActionUnit::Shell(format!("echo one > {}", a.display()))], Vec::new(), vec![tracked::file(&a)], Some("write-a".into()))
        .unwrap();
    wf.add_task(
        vec![ActionUnit::Shell(format!("cat {} > {}", a.display(), b.display()))],
        vec![tracked::file(&a)],
        vec![tracked::file(&b)],
        Some("write-b".into()),
    )
    .unwrap();
    wf.add_task(
        vec![ActionUnit::Shell(format!("echo other > {}", unrelated.display()))],
        Vec::new(),
        vec![tracked::file(&unrelated)],
        Some("write-unrelated".into()),
    )
    .unwrap();

    let summary =
        wf.run(RunOptions { until_task: Some("write-b".into()), ..RunOptions::default() }).await.unwrap();
    assert_eq!(summary.completed.len(), 2);
    assert!(b.exists());
    assert!(!unrelated.exists());
}

#[tokio::test]
async fn failed_parent_skips_descendant_with_parent_failed_message() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("never.txt");

    let mut wf = workflow();
    let parent = wf.add_task(vec![ActionUnit::Shell("exit 3".into())], Vec::new(), Vec::new(), Some("boom".into())).unwrap();
    wf.add_task(
        Vec::new(),
        vec![Tracked::from(parent)],
        vec![tracked::file(&target)],
        Some("never-runs".into()),
    )
    .unwrap();

    let result = wf.run(RunOptions::default()).await;
    let err = result.unwrap_err();
    assert!(matches!(err, anadama::Error::RunFailed { failed_count: 2 }));
    assert!(!target.exists());
}

#[tokio::test]
async fn unchanged_file_dependency_causes_task_to_be_skipped_on_rerun() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("input.txt");
    fs::write(&a, "hello").unwrap();
    let b = dir.path().join("output.txt");

    let backend = memory_backend();
    let mut wf = Workflow::new(WorkflowOptions { storage_backend: Some(backend.clone()), ..WorkflowOptions::default() });
    wf.add_task(
        vec![ActionUnit::Shell(format!("cp {} {}", a.display(), b.display()))],
        vec![tracked::file(&a)],
        vec![tracked::file(&b)],
        Some("copy".into()),
    )
    .unwrap();

    let first = wf.run(RunOptions::default()).await.unwrap();
    assert!(first.completed.len() == 1);

    let mut wf2 = Workflow::new(WorkflowOptions { storage_backend: Some(backend), ..WorkflowOptions::default() });
    wf2.add_task(
        vec![ActionUnit::Shell(format!("cp {} {}", a.display(), b.display()))],
        vec![tracked::file(&a)],
        vec![tracked::file(&b)],
        Some("copy".into()),
    )
    .unwrap();

    let second = wf2.run(RunOptions::default()).await.unwrap();
    assert!(second.completed.is_empty(), "nothing changed, so the task should be skipped");
}

#[tokio::test]
async fn editing_the_command_invalidates_the_cached_fingerprint() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let backend = memory_backend();

    let mut wf = Workflow::new(WorkflowOptions { storage_backend: Some(backend.clone()), ..WorkflowOptions::default() });
    wf.do_(&format!("echo one > {}", out.display())).unwrap();
    wf.run(RunOptions::default()).await.unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "one\n");

    let mut wf2 = Workflow::new(WorkflowOptions { storage_backend: Some(backend), ..WorkflowOptions::default() });
    wf2.do_(&format!("echo two > {}", out.display())).unwrap();
    let summary = wf2.run(RunOptions::default()).await.unwrap();
    assert_eq!(summary.completed.len(), 1, "a changed command must re-run even though the target already exists");
    assert_eq!(fs::read_to_string(&out).unwrap(), "two\n");
}

#[tokio::test]
async fn missing_target_after_actions_run_reports_not_produced() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("ghost.txt");

    let mut wf = workflow();
    wf.add_task(vec![ActionUnit::Shell("true".into())], Vec::new(), vec![tracked::file(&target)], Some("ghost".into()))
        .unwrap();

    let err = wf.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, anadama::Error::RunFailed { failed_count: 1 }));
}

#[tokio::test]
async fn run_them_all_reruns_even_unchanged_dependencies() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("input.txt");
    fs::write(&a, "hello").unwrap();
    let counter = dir.path().join("count.txt");
    fs::write(&counter, "0").unwrap();

    let backend = memory_backend();
    let cmd = format!("expr $(cat {}) + 1 > {}", counter.display(), counter.display());

    let mut wf = Workflow::new(WorkflowOptions { storage_backend: Some(backend.clone()), ..WorkflowOptions::default() });
    wf.add_task(
        vec![ActionUnit::Shell(cmd.clone())],
        vec![tracked::file(&a)],
        vec![tracked::file(&counter)],
        Some("tick".into()),
    )
    .unwrap();
    wf.run(RunOptions::default()).await.unwrap();
    assert_eq!(fs::read_to_string(&counter).unwrap().trim(), "1");

    let mut wf2 = Workflow::new(WorkflowOptions { storage_backend: Some(backend), ..WorkflowOptions::default() });
    wf2.add_task(vec![ActionUnit::Shell(cmd)], vec![tracked::file(&a)], vec![tracked::file(&counter)], Some("tick".into()))
        .unwrap();
    wf2.run(RunOptions { run_them_all: true, ..RunOptions::default() }).await.unwrap();
    assert_eq!(fs::read_to_string(&counter).unwrap().trim(), "2");
}
