//! # 控制台输出分类器
//!
//! 把 VASP 的控制台输出映射为故障标签集合。签名表是数据而不是控制流：
//! 扫描整段文本，每个命中的签名都会加入结果，不会在第一次命中后停止。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 使用
//! - 使用 `models/fault.rs`, `models/calculation.rs`

use crate::models::{CalculationData, FaultSet, FaultTag};

/// 最高能带占据数超过该值即认为能带数不足
pub const NEGLIGIBLE_OCCUPATION: f64 = 0.01;

/// (签名子串, 故障标签)
pub const SIGNATURES: &[(&str, FaultTag)] = &[
    ("Error reading item", FaultTag::InputDirectiveError),
    ("ZPOTRF", FaultTag::Zpotrf),
    ("SGRCON", FaultTag::Sgrcon),
    ("INVGRP", FaultTag::Invgrp),
    ("PRICEL", FaultTag::Pricel),
    ("RHOSYG", FaultTag::Rhosyg),
    ("POSMAP", FaultTag::Posmap),
    ("BRIONS problems: POTIM should be increased", FaultTag::Brions),
    ("TOO FEW BANDS", FaultTag::InsufficientElectronicBands),
    ("FEXCF", FaultTag::Fexcf),
    ("FEXCP", FaultTag::Fexcp),
    ("EDDDAV", FaultTag::Edddav),
    ("not hermitian in DAV", FaultTag::HermitianDav),
    ("BRMIX: very serious problems", FaultTag::Brmix),
    ("IBZKPT", FaultTag::Ibzkpt),
    ("ZBRENT", FaultTag::Zbrent),
];

/// 分类控制台输出
///
/// 没有任何内容的输出只得到 `EmptyOutput`。
pub fn classify(console: &str) -> FaultSet {
    if console.trim().is_empty() {
        return [FaultTag::EmptyOutput].into_iter().collect();
    }

    SIGNATURES
        .iter()
        .filter(|(signature, _)| console.contains(signature))
        .map(|&(_, tag)| tag)
        .collect()
}

/// 最高能带的占据数是否可以忽略
///
/// 没有能带信息时视为通过。
pub fn bands_converged(data: &CalculationData) -> bool {
    data.highest_band_occupation()
        .map_or(true, |occ| occ <= NEGLIGIBLE_OCCUPATION)
}

/// 能带数检查：不通过时返回 `InsufficientElectronicBands`
pub fn band_count_fault(data: &CalculationData) -> Option<FaultTag> {
    (!bands_converged(data)).then_some(FaultTag::InsufficientElectronicBands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KpointBands;
    use std::collections::BTreeMap;

    #[test]
    fn test_every_signature_is_recognized() {
        for (signature, tag) in SIGNATURES {
            let console = format!(" running on 32 nodes\n {} \n DAV:   1", signature);
            assert!(classify(&console).contains(*tag), "{} not detected", signature);
        }
    }

    #[test]
    fn test_multiple_faults_fire() {
        let console = "internal error in subroutine SGRCON\n\
                       WARNING: Sub-Space-Matrix is not hermitian in DAV\n\
                       ZBRENT: fatal error in bracketing\n";
        let faults = classify(console);
        let expected: FaultSet = [FaultTag::Sgrcon, FaultTag::HermitianDav, FaultTag::Zbrent]
            .into_iter()
            .collect();
        assert_eq!(faults, expected);
    }

    #[test]
    fn test_clean_output_has_no_faults() {
        let console = " DAV:   1    -0.1234E+02\n reached required accuracy - stopping structural energy minimisation\n";
        assert!(classify(console).is_empty());
    }

    #[test]
    fn test_empty_output() {
        let expected: FaultSet = [FaultTag::EmptyOutput].into_iter().collect();
        assert_eq!(classify(""), expected);
        assert_eq!(classify("  \n"), expected);
    }

    #[test]
    fn test_input_error_alone() {
        let faults = classify(" Error reading item 'ENCUT' from file INCAR.\n");
        let expected: FaultSet = [FaultTag::InputDirectiveError].into_iter().collect();
        assert_eq!(faults, expected);
    }

    fn with_top_occupation(occ: f64) -> CalculationData {
        let mut kpoints = BTreeMap::new();
        kpoints.insert(
            1,
            KpointBands {
                band_energies: vec![-3.0, 4.0],
                occupations: vec![1.0, occ],
            },
        );
        let mut data = CalculationData::default();
        data.band_occupations.insert("spin_1".to_string(), kpoints);
        data
    }

    #[test]
    fn test_band_count_check() {
        assert_eq!(band_count_fault(&with_top_occupation(0.0)), None);
        assert_eq!(
            band_count_fault(&with_top_occupation(0.3)),
            Some(FaultTag::InsufficientElectronicBands)
        );
        assert!(bands_converged(&CalculationData::default()));
    }
}
