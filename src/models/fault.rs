//! # 求解器故障标签
//!
//! 每个 `FaultTag` 对应一类可从 VASP 控制台输出识别的失败模式。
//! 变体的声明顺序就是修复规则的应用顺序（见 `workflow/remediation.rs`），
//! 检测和修复共用同一个枚举，不存在拼写不一致的问题。
//!
//! ## 依赖关系
//! - 被 `workflow/classifier.rs`, `workflow/remediation.rs`, `workflow/stage.rs` 使用
//! - 被 `error.rs` 使用

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// 故障类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// 已知且可修复的数值问题
    Transient,
    /// 已识别但没有修复办法，原样重试
    Unremediable,
    /// 需要人工干预，阶段立即终止
    Configuration,
}

/// 可识别的求解器故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultTag {
    Zpotrf,
    Fexcf,
    Fexcp,
    Sgrcon,
    Invgrp,
    Pricel,
    Rhosyg,
    Posmap,
    Brions,
    InsufficientElectronicBands,
    Edddav,
    HermitianDav,
    Brmix,
    Ibzkpt,
    Zbrent,
    InputDirectiveError,
    EmptyOutput,
}

impl FaultTag {
    /// 故障类别
    pub fn class(self) -> FaultClass {
        match self {
            FaultTag::InputDirectiveError | FaultTag::EmptyOutput => FaultClass::Configuration,
            FaultTag::Ibzkpt | FaultTag::Zbrent => FaultClass::Unremediable,
            _ => FaultClass::Transient,
        }
    }

    /// 是否需要终止阶段
    pub fn is_fatal(self) -> bool {
        self.class() == FaultClass::Configuration
    }

    /// 标签的稳定名称（用于日志和 JSON）
    pub fn name(self) -> &'static str {
        match self {
            FaultTag::Zpotrf => "zpotrf",
            FaultTag::Fexcf => "fexcf",
            FaultTag::Fexcp => "fexcp",
            FaultTag::Sgrcon => "sgrcon",
            FaultTag::Invgrp => "invgrp",
            FaultTag::Pricel => "pricel",
            FaultTag::Rhosyg => "rhosyg",
            FaultTag::Posmap => "posmap",
            FaultTag::Brions => "brions",
            FaultTag::InsufficientElectronicBands => "bands",
            FaultTag::Edddav => "edddav",
            FaultTag::HermitianDav => "hermitian_dav",
            FaultTag::Brmix => "brmix",
            FaultTag::Ibzkpt => "ibzkpt",
            FaultTag::Zbrent => "zbrent",
            FaultTag::InputDirectiveError => "input_error",
            FaultTag::EmptyOutput => "empty_stdout",
        }
    }
}

impl fmt::Display for FaultTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 故障集合（无序、无重复，按修复顺序迭代）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultSet(BTreeSet<FaultTag>);

impl FaultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: FaultTag) -> bool {
        self.0.insert(tag)
    }

    pub fn contains(&self, tag: FaultTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = FaultTag> + '_ {
        self.0.iter().copied()
    }

    /// 是否包含任一致命故障
    pub fn has_fatal(&self) -> bool {
        self.iter().any(FaultTag::is_fatal)
    }

    /// 仅保留致命故障
    pub fn fatal(&self) -> FaultSet {
        self.iter().filter(|t| t.is_fatal()).collect()
    }
}

impl FromIterator<FaultTag> for FaultSet {
    fn from_iter<I: IntoIterator<Item = FaultTag>>(iter: I) -> Self {
        FaultSet(iter.into_iter().collect())
    }
}

impl fmt::Display for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.iter().map(FaultTag::name).collect();
        write!(f, "{}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_set_dedup_and_order() {
        let set: FaultSet = [FaultTag::Brmix, FaultTag::Zpotrf, FaultTag::Brmix]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_string(), "zpotrf, brmix");
    }

    #[test]
    fn test_fault_classes() {
        assert!(FaultTag::EmptyOutput.is_fatal());
        assert!(FaultTag::InputDirectiveError.is_fatal());
        assert_eq!(FaultTag::Zbrent.class(), FaultClass::Unremediable);
        assert_eq!(FaultTag::Edddav.class(), FaultClass::Transient);

        let set: FaultSet = [FaultTag::Edddav, FaultTag::EmptyOutput].into_iter().collect();
        assert!(set.has_fatal());
        assert_eq!(set.fatal().len(), 1);
    }

    #[test]
    fn test_fault_set_json() {
        let set: FaultSet = [FaultTag::HermitianDav, FaultTag::InsufficientElectronicBands]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["insufficient_electronic_bands","hermitian_dav"]"#);
    }
}
