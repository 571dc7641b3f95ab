//! # 数据模型模块
//!
//! 定义晶体结构、计算参数、故障标签、计算结果和态密度数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`, `workflow/` 和 `commands/` 使用
//! - 子模块: structure, settings, fault, calculation, dos

pub mod calculation;
pub mod dos;
pub mod fault;
pub mod settings;
pub mod structure;

pub use calculation::{CalculationData, KpointBands};
pub use dos::DensityOfStates;
pub use fault::{FaultClass, FaultSet, FaultTag};
pub use settings::{CalculationSettings, SettingValue, SettingsRegistry};
pub use structure::{Atom, Crystal, Lattice};
