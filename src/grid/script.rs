//! Self-contained submission scripts (spec §4.5): one shell script per job,
//! with `stdout`/`stderr`/`rc` sibling files and a trailer that captures the
//! real exit code even if the scheduler kills the shell that wraps it.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::task::{ActionUnit, GridResourceRequest, Task};

use super::error::GridError;

pub struct ScriptPaths {
    pub script: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub rc: PathBuf,
}

/// `D-HH:MM:SS`, the SLURM/LSF wall-time format.
pub fn format_time_min(minutes: u64) -> String {
    let days = minutes / (24 * 60);
    let rem = minutes % (24 * 60);
    let hours = rem / 60;
    let mins = rem % 60;
    format!("{days}-{hours:02}:{mins:02}:00")
}

/// Substitutes `{cores}`, `{time}`, `{mem_mb}`, `{partition}`, `{extra}` and
/// `{script}` placeholders in a scheduler's submit template.
pub fn render_submit_template(
    template: &str,
    request: &GridResourceRequest,
    depends_bytes: u64,
    script_path: &Path,
) -> String {
    let time_min = request.time_min.evaluate(depends_bytes, request.cores);
    let mem_mb = request.mem_mb.evaluate(depends_bytes, request.cores);
    let extra = request.extra_options.join(" ");
    template
        .replace("{cores}", &request.cores.to_string())
        .replace("{time}", &format_time_min(time_min))
        .replace("{mem_mb}", &mem_mb.to_string())
        .replace("{partition}", request.partition.as_deref().unwrap_or(""))
        .replace("{extra}", &extra)
        .replace("{script}", &script_path.to_string_lossy())
}

/// Writes the job script for `task` under `tmpdir`, trailing every shell
/// action with `export RC=$? ; echo $RC > <rc_file> ; bash -c 'exit $RC'` so
/// the real exit code survives even under a scheduler-imposed kill signal.
pub fn write_script(task: &Task, tmpdir: &Path) -> Result<ScriptPaths, GridError> {
    std::fs::create_dir_all(tmpdir).map_err(|e| GridError::ScriptIo(e.to_string()))?;

    let stem = format!("anadama-task-{}", task.task_no);
    let script = tmpdir.join(format!("{stem}.sh"));
    let stdout = tmpdir.join(format!("{stem}.out"));
    let stderr = tmpdir.join(format!("{stem}.err"));
    let rc = tmpdir.join(format!("{stem}.rc"));

    let mut body = String::from("#!/bin/sh\nset -e\n");
    for action in &task.actions {
        match action {
            ActionUnit::Shell(cmd) => {
                body.push_str(cmd);
                body.push('\n');
            }
            ActionUnit::Callable(_) => {
                // No cross-process callable shipping: a grid-routed task with a
                // Callable action can't be executed here. `grid::worker::execute`
                // checks for this before a script is ever written.
            }
        }
    }
    body.push_str(&format!(
        "export RC=$? ; echo $RC > {} ; bash -c 'exit $RC'\n",
        shell_quote(&rc.to_string_lossy())
    ));

    let mut f = std::fs::File::create(&script).map_err(|e| GridError::ScriptIo(e.to_string()))?;
    f.write_all(body.as_bytes()).map_err(|e| GridError::ScriptIo(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = f.metadata().map_err(|e| GridError::ScriptIo(e.to_string()))?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).map_err(|e| GridError::ScriptIo(e.to_string()))?;
    }

    Ok(ScriptPaths { script, stdout, stderr, rc })
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Reads the exit code the RC trailer wrote, once the job has stopped.
pub fn read_rc(rc_path: &Path) -> Option<i32> {
    std::fs::read_to_string(rc_path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_as_slurm_duration() {
        assert_eq!(format_time_min(90), "0-01:30:00");
        assert_eq!(format_time_min(24 * 60 + 5), "1-00:05:00");
    }

    #[test]
    fn renders_template_placeholders() {
        let request = GridResourceRequest::new(60u64, 4096u64, 4).with_partition("short");
        let rendered = render_submit_template(
            "sbatch --time={time} --mem={mem_mb} -p {partition} -c {cores} {script}",
            &request,
            0,
            Path::new("/tmp/job.sh"),
        );
        assert_eq!(rendered, "sbatch --time=0-01:00:00 --mem=4096 -p short -c 4 /tmp/job.sh");
    }
}
