//! # VASP OUTCAR 解析器
//!
//! OUTCAR 是结构化结果的辅助来源：vasprun.xml 缺少 NBANDS 时从这里补齐，
//! 并提供运行是否正常结束、总 CPU 时间等信息。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 中的 `VasprunParser` 使用
//! - 被 `workflow/checkpoint.rs` 用于判断是否存在上一次运行

use crate::error::{Result, VaspflowError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// OUTCAR 中提取的摘要
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcarSummary {
    /// 是否出现计时统计（正常结束）
    pub is_finished: bool,
    /// 能带数
    pub n_bands: Option<u32>,
    /// 总 CPU 时间 (s)
    pub total_cpu_time: Option<f64>,
    /// 最后一个 energy(sigma->0) (eV)
    pub final_energy: Option<f64>,
}

/// 解析 VASP OUTCAR 文件
pub fn parse_outcar(path: &Path) -> Result<OutcarSummary> {
    let file = File::open(path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let reader = BufReader::new(file);
    let mut summary = OutcarSummary::default();

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        scan_line(&line, &mut summary);
    }

    Ok(summary)
}

fn scan_line(line: &str, summary: &mut OutcarSummary) {
    if line.contains("General timing and accounting informations for this job") {
        summary.is_finished = true;
    }

    // "   k-points           NKPTS =     10   k-points in BZ     NKDIM =     10   number of bands    NBANDS=     16"
    if line.contains("NBANDS=") {
        if let Some(val) = extract_number_after(line, "NBANDS=") {
            summary.n_bands = Some(val as u32);
        }
    }

    // "                  Total CPU time used (sec):       12.345"
    if line.contains("Total CPU time used (sec):") {
        summary.total_cpu_time = extract_last_number(line);
    }

    // "  energy  without entropy=      -17.70856130  energy(sigma->0) =      -17.70856130"
    if line.contains("energy  without entropy") {
        if let Some(pos) = line.find("energy(sigma->0)") {
            if let Some(val) = extract_number_after(&line[pos..], "=") {
                summary.final_energy = Some(val);
            }
        }
    }
}

/// 从字符串中提取指定标记之后的数字
fn extract_number_after(s: &str, marker: &str) -> Option<f64> {
    let pos = s.find(marker)?;
    let after = &s[pos + marker.len()..];
    after.split_whitespace().next()?.parse().ok()
}

/// 提取字符串中最后一个数字
fn extract_last_number(s: &str) -> Option<f64> {
    s.split_whitespace()
        .filter_map(|w| w.parse::<f64>().ok())
        .last()
}
