//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `workflow/`, `batch/`, `utils/`
//! - 子模块: breed, graze, herd

pub mod breed;
pub mod graze;
pub mod herd;

use crate::cli::Commands;
use crate::error::Result;

/// 配方未收敛时的退出码
pub const EXIT_NOT_CONVERGED: i32 = 2;

/// 执行命令，返回进程退出码
pub fn run(cmd: Commands) -> Result<i32> {
    match cmd {
        Commands::Breed(args) => breed::execute(args).map(|_| 0),
        Commands::Graze(args) => {
            let converged = graze::execute(args)?;
            Ok(if converged { 0 } else { EXIT_NOT_CONVERGED })
        }
        Commands::Herd(args) => herd::execute(args).map(|_| 0),
    }
}
