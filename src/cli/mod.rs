//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `breed`: 准备运行目录和 Slurm 作业脚本
//! - `graze`: 在运行目录中执行计算配方
//! - `herd`: 汇总各运行目录的阶段结果
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: breed, graze, herd

pub mod breed;
pub mod graze;
pub mod herd;

use clap::{Parser, Subcommand};

/// vaspflow - VASP 计算工作流引擎
#[derive(Parser)]
#[command(name = "vaspflow")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Run VASP calculation workflows with automatic error recovery", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Show debug-level engine diagnostics (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Prepare a run location and its Slurm batch script
    Breed(breed::BreedArgs),

    /// Run a calculation workflow in a run location
    Graze(graze::GrazeArgs),

    /// Collect stage results from run locations
    Herd(herd::HerdArgs),
}
