//! # vaspflow - VASP 计算工作流引擎
//!
//! 在运行目录中执行带自动纠错的 VASP 计算配方，单一可执行文件。
//!
//! ## 子命令
//! - `breed` - 准备运行目录，生成 Slurm 作业脚本
//! - `graze` - 执行计算配方（弛豫、单点、弛豫+单点……）
//! - `herd`  - 汇总各运行目录的阶段结果
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── workflow/  (状态机、分类、修复、收敛、检查点、配方)
//!   │     ├── batch/     (结果文件收集与并行加载)
//!   │     ├── parsers/   (POSCAR、vasprun.xml、OUTCAR)
//!   │     └── models/    (数据模型)
//!   ├── utils/      (工具函数)
//!   └── error.rs    (错误处理)
//! ```
//!
//! ## 退出码
//! - `0` 成功
//! - `1` 错误（致命故障、求解器进程失败、I/O 或参数错误）
//! - `2` 配方未在尝试次数内收敛

mod batch;
mod cli;
mod commands;
mod error;
mod models;
mod parsers;
mod utils;
mod workflow;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();
    init_logger(cli.verbose);

    match commands::run(cli.command) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::debug!("error category: {:?}", e.category());
            utils::output::print_error(&format!("{}", e));
            utils::output::print_hint(e.hint());
            std::process::exit(1);
        }
    }
}

/// RUST_LOG 优先；否则 -v 为 debug，默认 info
fn init_logger(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            let level = if verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            };
            builder.filter_module("vaspflow", level);
        }
    }
    builder.init();
}
