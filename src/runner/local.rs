//! The local worker: runs a task's actions on this machine, generalizing
//! dagrs's `DefaultTask` execution (shell actions via `tokio::process::Command`,
//! callable actions via its `Action::run` trait method).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::task::{ActionUnit, Input, Task, TaskResult};
use crate::utils::EnvVar;

pub async fn execute(task: &Task, env: Arc<EnvVar>) -> TaskResult {
    for action in &task.actions {
        let outcome = match action {
            ActionUnit::Shell(cmd) => run_shell(cmd).await,
            ActionUnit::Callable(action) => run_callable(action.clone(), env.clone()).await,
        };
        if let Err(err) = outcome {
            return TaskResult::failure(task.task_no, err);
        }
    }

    match crate::task::verify_and_compare(task) {
        Ok((keys, compares)) => TaskResult::success(task.task_no, keys, compares),
        Err(err) => TaskResult::failure(task.task_no, err),
    }
}

async fn run_shell(cmd: &str) -> Result<(), String> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await
        .map_err(|e| format!("failed to launch shell: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        let code = output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
        Err(format!("Return Code Error: {code}"))
    }
}

async fn run_callable(action: Arc<dyn crate::task::Action>, env: Arc<EnvVar>) -> Result<(), String> {
    let joined = tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(AssertUnwindSafe(|| action.run(Input::new(Vec::new()), env)))
    })
    .await
    .map_err(|e| format!("task action panicked: {e}"))?;

    match joined {
        Ok(crate::task::Output::Out(_)) => Ok(()),
        Ok(crate::task::Output::Err(msg)) => Err(msg),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task action panicked".to_string());
            Err(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::tracked::Tracked;

    #[tokio::test]
    async fn shell_success_reports_no_error() {
        let task = Task {
            task_no: 0,
            name: "true".into(),
            actions: vec![ActionUnit::Shell("true".into())],
            depends: Vec::new(),
            targets: Vec::new(),
            grid_request: None,
        };
        let result = execute(&task, Arc::new(EnvVar::new())).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn shell_failure_reports_return_code() {
        let task = Task {
            task_no: 0,
            name: "false".into(),
            actions: vec![ActionUnit::Shell("exit 7".into())],
            depends: Vec::new(),
            targets: Vec::new(),
            grid_request: None,
        };
        let result = execute(&task, Arc::new(EnvVar::new())).await;
        assert!(!result.is_success());
        assert!(result.error.contains("Return Code Error: 7"));
    }

    #[tokio::test]
    async fn missing_target_reports_not_produced() {
        let task = Task {
            task_no: 0,
            name: "noop".into(),
            actions: vec![ActionUnit::Shell("true".into())],
            depends: Vec::new(),
            targets: vec![Tracked::from("/nonexistent/path/for/anadama/tests")],
            grid_request: None,
        };
        let result = execute(&task, Arc::new(EnvVar::new())).await;
        assert!(result.error.contains("not produced"));
    }
}
