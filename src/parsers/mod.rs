//! # 解析器模块
//!
//! 提供结构文件和 VASP 输出文件的解析器。
//!
//! ## 依赖关系
//! - 被 `workflow/` 和 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: poscar, vasprun, outcar, dos

pub mod dos;
pub mod outcar;
pub mod poscar;
pub mod vasprun;

use crate::error::Result;
use crate::models::CalculationData;
use std::path::Path;

/// 结构化结果文件名
pub const VASPRUN_FILE: &str = "vasprun.xml";

/// 辅助输出文件名
pub const OUTCAR_FILE: &str = "OUTCAR";

/// 结构化输出解析器
///
/// 工作流每次尝试结束后调用，把工作目录中的输出变成 `CalculationData`。
pub trait OutputParser {
    fn parse(&self, work_dir: &Path) -> Result<CalculationData>;
}

/// 读取 vasprun.xml（必需）和 OUTCAR（可选）
#[derive(Debug, Clone, Copy, Default)]
pub struct VasprunParser;

impl OutputParser for VasprunParser {
    fn parse(&self, work_dir: &Path) -> Result<CalculationData> {
        let outcar = work_dir.join(OUTCAR_FILE);
        parse_calculation(
            &work_dir.join(VASPRUN_FILE),
            outcar.is_file().then_some(outcar.as_path()),
        )
    }
}

/// 解析一次计算的结果文件，辅助文件用于补齐缺失信息
pub fn parse_calculation(result_file: &Path, secondary: Option<&Path>) -> Result<CalculationData> {
    let mut data = vasprun::parse_vasprun(result_file)?;

    if let Some(path) = secondary {
        let summary = outcar::parse_outcar(path)?;
        data.is_finished = summary.is_finished;
        if data.n_bands.is_none() {
            data.n_bands = summary.n_bands;
        }
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_vasprun_parser_reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let without_nbands = vasprun::tests::SAMPLE.replace(
            "   <i type=\"int\" name=\"NBANDS\">     10</i>\n",
            "",
        );
        fs::write(dir.path().join(VASPRUN_FILE), without_nbands).unwrap();
        fs::write(
            dir.path().join(OUTCAR_FILE),
            "   number of bands    NBANDS=     24\n General timing and accounting informations for this job:\n",
        )
        .unwrap();

        let data = VasprunParser.parse(dir.path()).unwrap();
        assert_eq!(data.n_bands, Some(24));
        assert!(data.is_finished);
        assert_eq!(data.n_ionic_steps, 2);
    }

    #[test]
    fn test_missing_result_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VasprunParser.parse(dir.path()).is_err());
    }
}
