//! # breed 子命令 CLI 定义
//!
//! 准备运行目录并生成 Slurm 作业脚本
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/breed.rs`

use clap::Args;
use std::path::PathBuf;

/// breed 子命令参数
#[derive(Args, Debug)]
pub struct BreedArgs {
    /// Structure file to calculate (VASP 5 POSCAR)
    #[arg(short, long)]
    pub input_structure: PathBuf,

    /// Run location (created if missing)
    #[arg(short, long)]
    pub run_location: PathBuf,

    /// Calculation workflow passed on to graze
    #[arg(short, long, default_value = "relaxation")]
    pub workflow: String,

    /// JSON file with non-default settings per stage (copied into the run location)
    #[arg(short, long)]
    pub custom_settings: Option<PathBuf>,

    // ─────────────────────────────────────────────────────────────
    // VASP options
    // ─────────────────────────────────────────────────────────────
    /// Command used to launch VASP, written to mpi_call.txt
    #[arg(long, env = "VASPFLOW_MPI_CALL", default_value = "srun vasp_std")]
    pub mpi_call: String,

    /// POTCAR file copied into the run location
    #[arg(long, conflicts_with = "potcar_dir")]
    pub potcar: Option<PathBuf>,

    /// POTCAR library root handed to graze in the batch script
    #[arg(long, env = "VASPFLOW_POTCAR_DIR")]
    pub potcar_dir: Option<PathBuf>,

    /// Module list to load in the batch script (comma-separated)
    #[arg(long, default_value = "")]
    pub modules: String,

    // ─────────────────────────────────────────────────────────────
    // Slurm options
    // ─────────────────────────────────────────────────────────────
    /// Slurm job name (defaults to the run location's name)
    #[arg(long)]
    pub job_name: Option<String>,

    /// Slurm partition
    #[arg(long, default_value = "normal")]
    pub partition: String,

    /// Slurm constraint
    #[arg(long)]
    pub constraint: Option<String>,

    /// Number of nodes
    #[arg(long, default_value_t = 1)]
    pub nodes: u32,

    /// Number of tasks
    #[arg(long, default_value_t = 32)]
    pub ntasks: u32,

    /// CPUs per task
    #[arg(long, default_value_t = 1)]
    pub cpus_per_task: u32,

    /// Memory per CPU
    #[arg(long, default_value = "3G")]
    pub mem_per_cpu: String,

    /// Time limit (e.g., '24:00:00')
    #[arg(long, default_value = "24:00:00")]
    pub time: String,

    // ─────────────────────────────────────────────────────────────
    // Execution control
    // ─────────────────────────────────────────────────────────────
    /// Only generate job files, do not submit
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Submit the job to Slurm after generation
    #[arg(long, default_value_t = false)]
    pub submit: bool,
}
