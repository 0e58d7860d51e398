//! The `vars` configuration bag (spec §6): a typed read of `ANADAMA_*`
//! environment variables. The interactive CLI/config-dialog that would
//! normally populate this is out of scope; this module only defines the bag
//! and its env-backed defaults.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    pub backend_dir: Option<PathBuf>,
    pub n_parallel: Option<usize>,
    pub n_grid_parallel: Option<usize>,
    pub run_them_all: bool,
    pub quit_early: bool,
    pub until_task: Option<String>,
    pub dry_run: bool,
}

impl Configuration {
    pub fn from_env() -> Self {
        Self {
            backend_dir: env::var_os("ANADAMA_BACKEND_DIR").map(PathBuf::from),
            n_parallel: env::var("ANADAMA_N_PARALLEL").ok().and_then(|s| s.parse().ok()),
            n_grid_parallel: env::var("ANADAMA_N_GRID_PARALLEL").ok().and_then(|s| s.parse().ok()),
            run_them_all: env_flag("ANADAMA_RUN_THEM_ALL"),
            quit_early: env_flag("ANADAMA_QUIT_EARLY"),
            until_task: env::var("ANADAMA_UNTIL_TASK").ok(),
            dry_run: env_flag("ANADAMA_DRY_RUN"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(env::var(name).ok().as_deref(), Some("1") | Some("true") | Some("yes"))
}
