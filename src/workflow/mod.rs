//! # 计算工作流引擎
//!
//! 有界重试的状态机：每次尝试生成输入、调用求解器、分类输出、判断收敛，
//! 未收敛时修改参数并从最新结构重启。配方驱动器把多个阶段串联起来。
//!
//! ## 依赖关系
//! - 被 `commands/graze.rs` 使用
//! - 使用 `models/`, `parsers/`
//! - 子模块: classifier, remediation, convergence, checkpoint, invoker,
//!   input, defaults, stage, recipe

pub mod checkpoint;
pub mod classifier;
pub mod convergence;
pub mod defaults;
pub mod input;
pub mod invoker;
pub mod recipe;
pub mod remediation;
pub mod stage;

pub use checkpoint::CheckpointManager;
pub use convergence::ConvergenceEvaluator;
pub use input::{InputGenerator, VaspInputGenerator};
pub use invoker::{ProcessInvoker, SolverInvoker};
pub use recipe::{RecipeDriver, RecipeReport, WorkflowRecipe};
pub use remediation::{RemediationPolicy, SettingsDelta};
pub use stage::{AttemptRecord, StageMachine, StageOutcome, StageState};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 阶段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// 结构弛豫
    Relaxation,
    /// 单点计算
    Static,
    /// 超胞力计算（声子有限位移）
    #[serde(rename = "sc_forces")]
    SupercellForces,
    /// 高精度标准化弛豫
    #[serde(rename = "acc_std_relax")]
    StandardizedRelax,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Relaxation,
        StageKind::Static,
        StageKind::SupercellForces,
        StageKind::StandardizedRelax,
    ];

    /// 阶段名（自定义参数文件的键、结果文件前缀）
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Relaxation => "relaxation",
            StageKind::Static => "static",
            StageKind::SupercellForces => "sc_forces",
            StageKind::StandardizedRelax => "acc_std_relax",
        }
    }

    /// 是否移动离子（结构会在尝试之间变化）
    pub fn is_relaxation(self) -> bool {
        matches!(self, StageKind::Relaxation | StageKind::StandardizedRelax)
    }

    /// 默认最大尝试次数
    pub fn default_max_attempts(self) -> usize {
        if self.is_relaxation() {
            5
        } else {
            2
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}
