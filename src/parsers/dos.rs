//! # 态密度解析器
//!
//! 读取总态密度网格，vasprun.xml 优先，其次 DOSCAR。
//!
//! vasprun.xml 中读取 `<dos>` 块的 `efermi` 和 `<total>` 数组
//! （每行：能量、态密度、积分态密度，每个自旋一个 `<set>`）。
//! DOSCAR 第 6 行为 `Emax Emin NEDOS Efermi weight`，之后 NEDOS 行，
//! 非自旋极化 3 列，自旋极化 5 列。
//!
//! ## 依赖关系
//! - 被 `commands/herd.rs` 使用
//! - 使用 `models/dos.rs`
//! - 使用 `regex` 提取元素内容

use crate::error::{Result, VaspflowError};
use crate::models::DensityOfStates;
use crate::parsers::VASPRUN_FILE;

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// 态密度文本文件名
pub const DOSCAR_FILE: &str = "DOSCAR";

struct Patterns {
    efermi: Regex,
    row: Regex,
    spin_set: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        efermi: Regex::new(r#"<i\b[^>]*\bname="efermi"[^>]*>([^<]*)</i>"#).unwrap(),
        row: Regex::new(r"<r>([^<]*)</r>").unwrap(),
        spin_set: Regex::new(r#"<set\b[^>]*comment="spin\s*(\d+)""#).unwrap(),
    })
}

/// 读取计算目录中的总态密度；两个文件都不存在时为 None
pub fn read_dos(work_dir: &Path) -> Result<Option<DensityOfStates>> {
    let vasprun = work_dir.join(VASPRUN_FILE);
    if vasprun.is_file() {
        let content = read(&vasprun)?;
        let dos = parse_vasprun_dos(&content, &vasprun.display().to_string())?;
        if !dos.is_empty() {
            return Ok(Some(dos));
        }
        log::debug!("{} has no total DOS", vasprun.display());
    }

    let doscar = work_dir.join(DOSCAR_FILE);
    if doscar.is_file() {
        let content = read(&doscar)?;
        return parse_doscar(&content, &doscar.display().to_string()).map(Some);
    }

    Ok(None)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })
}

fn parse_error(format: &str, origin: &str, reason: impl Into<String>) -> VaspflowError {
    VaspflowError::ParseError {
        format: format.to_string(),
        path: origin.to_string(),
        reason: reason.into(),
    }
}

fn parse_values(text: &str, format: &str, origin: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|s| {
            s.parse()
                .map_err(|_| parse_error(format, origin, format!("'{}' is not a number", s)))
        })
        .collect()
}

/// 从 vasprun.xml 内容解析总态密度（没有 `<dos>` 块时返回空网格）
pub fn parse_vasprun_dos(content: &str, origin: &str) -> Result<DensityOfStates> {
    let p = patterns();
    let mut in_dos = false;
    let mut in_total = false;
    let mut fermi = None;
    let mut energies = Vec::new();
    let mut total: Vec<Vec<f64>> = Vec::new();
    let mut integrated: Vec<Vec<f64>> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("<dos") {
            in_dos = true;
            continue;
        }
        if !in_dos {
            continue;
        }
        if trimmed.starts_with("</dos>") {
            break;
        }
        if let Some(c) = p.efermi.captures(trimmed) {
            let values = parse_values(&c[1], "vasprun.xml", origin)?;
            fermi = values.first().copied();
            continue;
        }
        if trimmed.starts_with("<total>") {
            in_total = true;
            continue;
        }
        if trimmed.starts_with("</total>") {
            in_total = false;
            continue;
        }
        if !in_total {
            continue;
        }
        if p.spin_set.is_match(trimmed) {
            total.push(Vec::new());
            integrated.push(Vec::new());
            continue;
        }
        if let Some(c) = p.row.captures(trimmed) {
            let values = parse_values(&c[1], "vasprun.xml", origin)?;
            if values.len() < 3 {
                return Err(parse_error(
                    "vasprun.xml",
                    origin,
                    format!("expected 3 DOS columns in '{}'", c[1].trim()),
                ));
            }
            // 能量网格只取第一个自旋通道
            if total.len() == 1 {
                energies.push(values[0]);
            }
            match (total.last_mut(), integrated.last_mut()) {
                (Some(total_ch), Some(integrated_ch)) => {
                    total_ch.push(values[1]);
                    integrated_ch.push(values[2]);
                }
                _ => return Err(parse_error("vasprun.xml", origin, "DOS row outside a spin set")),
            }
        }
    }

    if energies.is_empty() {
        return Ok(DensityOfStates::default());
    }
    let fermi = fermi.ok_or_else(|| parse_error("vasprun.xml", origin, "DOS without efermi"))?;
    if total.iter().any(|ch| ch.len() != energies.len()) {
        return Err(parse_error("vasprun.xml", origin, "spin channels differ in length"));
    }

    Ok(DensityOfStates {
        fermi_energy: fermi,
        energies: energies.into_iter().map(|e| e - fermi).collect(),
        total,
        integrated,
    })
}

/// 从 DOSCAR 内容解析总态密度
pub fn parse_doscar(content: &str, origin: &str) -> Result<DensityOfStates> {
    let mut lines = content.lines().skip(5);
    let header = lines
        .next()
        .ok_or_else(|| parse_error("DOSCAR", origin, "missing grid header (line 6)"))?;
    let header = parse_values(header, "DOSCAR", origin)?;
    let (n_points, fermi) = match header.as_slice() {
        [_, _, n, fermi, ..] => (*n as usize, *fermi),
        _ => return Err(parse_error("DOSCAR", origin, "grid header needs 4 values")),
    };

    let mut dos = DensityOfStates {
        fermi_energy: fermi,
        ..DensityOfStates::default()
    };
    for (i, line) in lines.take(n_points).enumerate() {
        let values = parse_values(line, "DOSCAR", origin)?;
        let spins = match values.len() {
            3 => 1,
            5 => 2,
            n => {
                return Err(parse_error(
                    "DOSCAR",
                    origin,
                    format!("grid point {} has {} columns", i + 1, n),
                ))
            }
        };
        if dos.total.is_empty() {
            dos.total = vec![Vec::with_capacity(n_points); spins];
            dos.integrated = vec![Vec::with_capacity(n_points); spins];
        } else if dos.total.len() != spins {
            return Err(parse_error("DOSCAR", origin, "column count changes within the grid"));
        }
        dos.energies.push(values[0] - fermi);
        for s in 0..spins {
            dos.total[s].push(values[1 + s]);
            dos.integrated[s].push(values[1 + spins + s]);
        }
    }

    if dos.energies.len() != n_points {
        return Err(parse_error(
            "DOSCAR",
            origin,
            format!("expected {} grid points, found {}", n_points, dos.energies.len()),
        ));
    }
    Ok(dos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dos::DEFAULT_DOS_TOLERANCE;

    const VASPRUN_DOS: &str = r#"<modeling>
 <calculation>
  <eigenvalues>
   <array>
    <set>
     <set comment="spin 1">
      <set comment="kpoint 1">
       <r>   -5.0000    1.0000 </r>
      </set>
     </set>
    </set>
   </array>
  </eigenvalues>
  <dos>
   <i name="efermi">      5.00000000 </i>
   <total>
    <array>
     <dimension dim="1">gridpoints</dimension>
     <dimension dim="2">spin</dimension>
     <field>energy</field>
     <field>total</field>
     <field>integrated</field>
     <set>
      <set comment="spin 1">
       <r>     3.0000     2.0000     8.0000 </r>
       <r>     4.0000     1.0000     9.0000 </r>
       <r>     5.0000     0.0000     9.0000 </r>
       <r>     6.0000     0.0000     9.0000 </r>
       <r>     7.0000     3.0000    12.0000 </r>
      </set>
     </set>
    </array>
   </total>
   <partial>
    <array>
     <set>
      <set comment="ion 1">
       <set comment="spin 1">
        <r>     3.0000     0.5000     0.5000 </r>
       </set>
      </set>
     </set>
    </array>
   </partial>
  </dos>
 </calculation>
</modeling>
"#;

    const DOSCAR: &str = "    2    2    1    0
  0.1E+02  0.1E-09  0.1E-09  0.1E-09  0.5E-15
  1.0E-004
  CAR
 Si
      7.00000000      3.00000000      5      5.00000000      1.00000000
     3.000  1.000  1.000  4.000  4.000
     4.000  0.500  0.500  4.500  4.500
     5.000  0.000  0.000  4.500  4.500
     6.000  0.000  0.000  4.500  4.500
     7.000  1.500  1.500  6.000  6.000
";

    #[test]
    fn test_vasprun_total_dos() {
        let dos = parse_vasprun_dos(VASPRUN_DOS, "vasprun.xml").unwrap();
        assert_eq!(dos.fermi_energy, 5.0);
        assert_eq!(dos.energies, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        assert_eq!(dos.n_spins(), 1);
        assert_eq!(dos.integrated[0][4], 12.0);
        assert_eq!(dos.calculate_band_gap(DEFAULT_DOS_TOLERANCE), Some(3.0));
    }

    #[test]
    fn test_vasprun_without_dos_is_empty() {
        let dos = parse_vasprun_dos("<modeling>\n</modeling>\n", "vasprun.xml").unwrap();
        assert!(dos.is_empty());
    }

    #[test]
    fn test_spin_polarized_doscar() {
        let dos = parse_doscar(DOSCAR, "DOSCAR").unwrap();
        assert_eq!(dos.n_spins(), 2);
        assert_eq!(dos.energies.len(), 5);
        assert_eq!(dos.summed(0), 2.0);
        assert_eq!(dos.find_vbm(DEFAULT_DOS_TOLERANCE), Some(-1.0));
        assert_eq!(dos.find_cbm(DEFAULT_DOS_TOLERANCE), Some(2.0));
    }

    #[test]
    fn test_truncated_doscar() {
        let truncated: String = DOSCAR.lines().take(8).map(|l| format!("{}\n", l)).collect();
        assert!(matches!(
            parse_doscar(&truncated, "DOSCAR"),
            Err(VaspflowError::ParseError { .. })
        ));
    }

    #[test]
    fn test_read_dos_prefers_vasprun() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_dos(dir.path()).unwrap().is_none());

        fs::write(dir.path().join(DOSCAR_FILE), DOSCAR).unwrap();
        assert_eq!(read_dos(dir.path()).unwrap().unwrap().n_spins(), 2);

        fs::write(dir.path().join(VASPRUN_FILE), VASPRUN_DOS).unwrap();
        assert_eq!(read_dos(dir.path()).unwrap().unwrap().n_spins(), 1);
    }
}
