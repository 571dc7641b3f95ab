//! # 各阶段默认 INCAR 参数
//!
//! 用户自定义参数在这些默认值之上浅合并。
//!
//! ## 依赖关系
//! - 被 `models/settings.rs` 中的 `SettingsRegistry` 使用
//! - 被 `workflow/remediation.rs` 用于 POTIM 初值

use crate::models::{CalculationSettings, SettingValue};
use crate::workflow::StageKind;

/// POTIM 未设置时的初值（弛豫默认值）
pub const DEFAULT_POTIM: f64 = 0.5;

/// 未设置 EDIFF 时的能量收敛阈值 (VASP 默认)
pub const DEFAULT_EDIFF: f64 = 1e-4;

fn relaxation() -> CalculationSettings {
    let entries: [(&str, SettingValue); 15] = [
        ("prec", "accurate".into()),
        ("encut", SettingValue::Int(520)),
        ("ediff", SettingValue::Float(1e-6)),
        ("ediffg", SettingValue::Float(-0.01)),
        ("ibrion", SettingValue::Int(2)),
        ("isif", SettingValue::Int(3)),
        ("nsw", SettingValue::Int(100)),
        ("potim", SettingValue::Float(DEFAULT_POTIM)),
        ("ismear", SettingValue::Int(0)),
        ("sigma", SettingValue::Float(0.05)),
        ("algo", "normal".into()),
        ("lreal", "auto".into()),
        ("kspacing", SettingValue::Float(0.25)),
        ("lwave", SettingValue::Bool(false)),
        ("lcharg", SettingValue::Bool(true)),
    ];
    entries.into_iter().collect()
}

fn static_run() -> CalculationSettings {
    let mut s = relaxation();
    for key in ["ediffg", "isif", "potim"] {
        s.remove(key);
    }
    s.set("ibrion", SettingValue::Int(-1));
    s.set("nsw", SettingValue::Int(0));
    s.set("ismear", SettingValue::Int(-5));
    s.set("lorbit", SettingValue::Int(11));
    s
}

fn supercell_forces() -> CalculationSettings {
    let mut s = static_run();
    s.remove("lorbit");
    s.set("ediff", SettingValue::Float(1e-8));
    s.set("lreal", SettingValue::Bool(false));
    s.set("addgrid", SettingValue::Bool(true));
    s.set("ismear", SettingValue::Int(0));
    s.set("sigma", SettingValue::Float(0.01));
    s.set("lcharg", SettingValue::Bool(false));
    s
}

fn standardized_relax() -> CalculationSettings {
    let mut s = relaxation();
    s.set("ediff", SettingValue::Float(1e-8));
    s.set("ediffg", SettingValue::Float(-1e-3));
    s.set("addgrid", SettingValue::Bool(true));
    s.set("lreal", SettingValue::Bool(false));
    s
}

/// 某阶段的默认参数
pub fn default_settings(kind: StageKind) -> CalculationSettings {
    match kind {
        StageKind::Relaxation => relaxation(),
        StageKind::Static => static_run(),
        StageKind::SupercellForces => supercell_forces(),
        StageKind::StandardizedRelax => standardized_relax(),
    }
}
