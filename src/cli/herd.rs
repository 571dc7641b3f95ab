//! # herd 子命令 CLI 定义
//!
//! 汇总运行目录中的阶段结果文件
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/herd.rs`

use clap::Args;
use std::path::PathBuf;

/// herd 子命令参数
#[derive(Args, Debug)]
pub struct HerdArgs {
    /// Root directory to search for <stage>_data.json files
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// File name pattern (comma-separated for multiple patterns)
    #[arg(short, long, default_value = "*_data.json")]
    pub pattern: String,

    /// Only look in the root directory itself
    #[arg(long, default_value_t = false)]
    pub no_recursive: bool,

    /// Number of parallel jobs (0 = all CPUs)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Export the summary to a CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,
}
