//! # 故障修复策略
//!
//! 把故障集合映射为参数增量。规则按 `FaultTag` 的声明顺序依次应用，
//! 键冲突时后面的规则覆盖前面的。每条规则只读取当前参数（尝试开始时的值），
//! 因此同一组故障重复出现时修改是逐次累积的：连续两次 ZPOTRF 使 POTIM 变为 1/4。
//!
//! 策略是纯函数：相同的 (故障集合, 参数, 计算数据) 总是得到相同的增量。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 使用
//! - 使用 `workflow/defaults.rs` 中的 POTIM 初值

use crate::models::{CalculationData, CalculationSettings, FaultSet, FaultTag, SettingValue};
use crate::workflow::defaults::DEFAULT_POTIM;

/// 对称性精度（对称性识别失败）
pub const LOOSE_SYMPREC: f64 = 1e-4;

/// 对称性精度（BRMIX 严重混合失败）
pub const TIGHT_SYMPREC: f64 = 1e-6;

/// 一次修复产生的参数变化
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsDelta {
    /// 当前阶段的参数修改
    pub changes: CalculationSettings,
    /// 需要同步到所有阶段的参数（同时也包含在 `changes` 中）
    pub shared: CalculationSettings,
}

impl SettingsDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// 就地应用到参数上
    pub fn apply_to(&self, settings: &mut CalculationSettings) {
        settings.merge(&self.changes);
    }

    fn set(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.changes.set(key, value);
    }

    fn share(&mut self, key: &str, value: SettingValue) {
        self.changes.set(key, value.clone());
        self.shared.set(key, value);
    }
}

/// 修复规则表
#[derive(Debug, Clone, Copy)]
pub struct RemediationPolicy {
    /// POTIM 未设置时的初值
    pub potim_seed: f64,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            potim_seed: DEFAULT_POTIM,
        }
    }
}

impl RemediationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计算参数增量
    ///
    /// 包含致命故障时不计算任何增量，返回其中的致命故障。
    pub fn remediate(
        &self,
        faults: &FaultSet,
        settings: &CalculationSettings,
        data: Option<&CalculationData>,
    ) -> Result<SettingsDelta, FaultSet> {
        if faults.has_fatal() {
            return Err(faults.fatal());
        }

        let mut delta = SettingsDelta::default();
        for tag in faults.iter() {
            self.apply_rule(tag, settings, data, &mut delta);
        }
        Ok(delta)
    }

    fn apply_rule(
        &self,
        tag: FaultTag,
        settings: &CalculationSettings,
        data: Option<&CalculationData>,
        delta: &mut SettingsDelta,
    ) {
        match tag {
            FaultTag::Zpotrf | FaultTag::Fexcf | FaultTag::Fexcp => {
                delta.set("potim", self.current_potim(settings) * 0.5);
            }
            FaultTag::Sgrcon
            | FaultTag::Invgrp
            | FaultTag::Pricel
            | FaultTag::Rhosyg
            | FaultTag::Posmap => {
                delta.set("symprec", LOOSE_SYMPREC);
            }
            FaultTag::Brions => {
                delta.set("potim", self.current_potim(settings) * 2.0);
            }
            FaultTag::InsufficientElectronicBands => {
                let old = data
                    .and_then(|d| d.n_bands.map(i64::from))
                    .or_else(|| settings.get_i64("nbands"));
                match old {
                    Some(old) => delta.share("nbands", SettingValue::Int(increased_bands(old))),
                    None => log::warn!("band count unknown, NBANDS left unchanged"),
                }
            }
            FaultTag::Edddav | FaultTag::HermitianDav => {
                let algo = settings.get_str("algo").unwrap_or("normal");
                if algo.to_lowercase().starts_with('n') {
                    delta.set("algo", "fast");
                }
            }
            FaultTag::Brmix => {
                delta.set("symprec", TIGHT_SYMPREC);
            }
            // 没有已知修复办法，原样重试
            FaultTag::Ibzkpt | FaultTag::Zbrent => {}
            FaultTag::InputDirectiveError | FaultTag::EmptyOutput => {}
        }
    }

    fn current_potim(&self, settings: &CalculationSettings) -> f64 {
        settings.get_f64("potim").unwrap_or(self.potim_seed)
    }
}

/// 新能带数 = max(ceil(old * 1.2), old + 4)
pub fn increased_bands(old: i64) -> i64 {
    let scaled = (old as f64 * 1.2).ceil() as i64;
    scaled.max(old + 4)
}
