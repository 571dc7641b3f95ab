//! # graze 子命令 CLI 定义
//!
//! 在运行目录中执行计算配方
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/graze.rs`

use clap::Args;
use std::path::PathBuf;

/// graze 子命令参数
#[derive(Args, Debug)]
pub struct GrazeArgs {
    /// Run location (contains init_structure.vasp and mpi_call.txt)
    #[arg(default_value = ".")]
    pub run_location: PathBuf,

    /// Calculation workflow: relaxation, static, relaxation+static, acc_std_relax, sc_forces
    #[arg(short, long, default_value = "relaxation")]
    pub workflow: String,

    /// JSON file with non-default settings per stage,
    /// e.g. {"relaxation": {"ediff": 1e-8}, "static": {"sigma": 0.05}}
    #[arg(short, long)]
    pub custom_settings: Option<PathBuf>,

    /// Input structure (relative paths are resolved against the run location)
    #[arg(long, default_value = "init_structure.vasp")]
    pub input_structure: PathBuf,

    // ─────────────────────────────────────────────────────────────
    // Solver options
    // ─────────────────────────────────────────────────────────────
    /// Command used to launch VASP (falls back to mpi_call.txt in the run location)
    #[arg(long, env = "VASPFLOW_MPI_CALL")]
    pub mpi_call: Option<String>,

    /// POTCAR library root, laid out as <dir>/<element>/POTCAR
    #[arg(long, env = "VASPFLOW_POTCAR_DIR")]
    pub potcar_dir: Option<PathBuf>,

    // ─────────────────────────────────────────────────────────────
    // Execution control
    // ─────────────────────────────────────────────────────────────
    /// Delete stage subdirectories before starting instead of resuming
    #[arg(long, default_value_t = false)]
    pub from_scratch: bool,

    /// Maximum solver runs for relaxation stages
    #[arg(long, default_value_t = 5)]
    pub max_relaxation_attempts: usize,

    /// Maximum solver runs for single-point stages
    #[arg(long, default_value_t = 2)]
    pub max_static_attempts: usize,

    /// Do not show a spinner while the solver runs
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}
