//! # 收敛判据
//!
//! - 能量判据：最后一个离子步中最后两个自洽步的能量差 < EDIFF
//! - 受力判据：EDIFFG < 0 时最大原子受力 < |EDIFFG|；
//!   EDIFFG > 0 时最后两个离子步的自由能差 < EDIFFG
//!
//! 弛豫阶段两者都要满足，单点阶段只看能量。能带数检查不在这里，
//! 它只会为下一次尝试注入故障（见 `workflow/classifier.rs`）。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 使用

use crate::models::{CalculationData, CalculationSettings};
use crate::workflow::defaults::DEFAULT_EDIFF;
use crate::workflow::StageKind;

/// 一次判定的细节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub energy: bool,
    /// 单点阶段不检查受力
    pub forces: Option<bool>,
}

impl Verdict {
    pub fn converged(&self) -> bool {
        self.energy && self.forces.unwrap_or(true)
    }
}

/// 阶段收敛判定器
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceEvaluator {
    kind: StageKind,
}

impl ConvergenceEvaluator {
    pub fn new(kind: StageKind) -> Self {
        Self { kind }
    }

    /// 按阶段类型判定
    pub fn evaluate(&self, settings: &CalculationSettings, data: &CalculationData) -> Verdict {
        let ediff = settings.get_f64("ediff").unwrap_or(DEFAULT_EDIFF);
        let energy = energy_converged(data, ediff);

        let forces = self.kind.is_relaxation().then(|| {
            // VASP 默认 EDIFFG = 10 * EDIFF
            let ediffg = settings.get_f64("ediffg").unwrap_or(10.0 * ediff);
            forces_converged(data, ediffg)
        });

        Verdict { energy, forces }
    }
}

/// 电子自洽是否收敛（至少需要两个自洽步）
pub fn energy_converged(data: &CalculationData, ediff: f64) -> bool {
    match data.final_scf_energies() {
        [.., previous, last] => (last - previous).abs() < ediff.abs(),
        _ => false,
    }
}

/// 离子弛豫是否收敛
pub fn forces_converged(data: &CalculationData, ediffg: f64) -> bool {
    if ediffg < 0.0 {
        return data
            .max_residual_force()
            .map_or(false, |max| max < ediffg.abs());
    }

    let energies: Vec<f64> = data.free_energies.iter().flatten().copied().collect();
    match energies.as_slice() {
        [.., previous, last] => (last - previous).abs() < ediffg,
        _ => false,
    }
}
