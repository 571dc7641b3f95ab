//! # VASP POSCAR 格式读写
//!
//! 读取初始结构和弛豫后的 CONTCAR，写出求解器输入的 POSCAR。
//!
//! ## POSCAR 格式说明
//! ```text
//! Comment line (structure name)
//! 1.0                    # scaling factor
//! a1 a2 a3               # lattice vector a
//! b1 b2 b3               # lattice vector b
//! c1 c2 c3               # lattice vector c
//! Element1 Element2 ...  # element symbols (VASP 5+)
//! n1 n2 ...              # number of atoms per element
//! Selective dynamics     # optional
//! Direct/Cartesian       # coordinate type
//! x1 y1 z1               # atom positions
//! ...
//! ```
//!
//! ## 依赖关系
//! - 被 `workflow/checkpoint.rs`, `workflow/input.rs`, `workflow/recipe.rs` 使用
//! - 使用 `models/structure.rs`

use crate::error::{Result, VaspflowError};
use crate::models::{Atom, Crystal, Lattice};
use std::fs;
use std::path::Path;

/// 解析 POSCAR/CONTCAR 文件
pub fn parse_poscar_file(path: &Path) -> Result<Crystal> {
    if !path.is_file() {
        return Err(VaspflowError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_poscar_content(&content, &path.display().to_string())
}

fn parse_error(origin: &str, reason: impl Into<String>) -> VaspflowError {
    VaspflowError::ParseError {
        format: "poscar".to_string(),
        path: origin.to_string(),
        reason: reason.into(),
    }
}

/// 从字符串内容解析 POSCAR 格式（仅支持 VASP 5 元素行）
pub fn parse_poscar_content(content: &str, origin: &str) -> Result<Crystal> {
    let lines: Vec<&str> = content.lines().collect();

    if lines.len() < 8 {
        return Err(parse_error(origin, "File too short"));
    }

    let name = lines[0].trim().to_string();

    let scale: f64 = lines[1]
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| parse_error(origin, "Scaling factor (line 2) should be a number"))?;

    let mut matrix = [[0.0; 3]; 3];
    for (i, row) in matrix.iter_mut().enumerate() {
        let parts: Vec<f64> = lines[2 + i]
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect();
        if parts.len() < 3 {
            return Err(parse_error(
                origin,
                format!("Invalid lattice vector at line {}", 3 + i),
            ));
        }
        *row = [parts[0] * scale, parts[1] * scale, parts[2] * scale];
    }
    let lattice = Lattice::from_vectors(matrix);

    let elements: Vec<String> = lines[5].split_whitespace().map(str::to_string).collect();
    if elements.is_empty() || elements[0].parse::<i64>().is_ok() {
        return Err(parse_error(
            origin,
            "Species names (line 6) are required; only the VASP 5 format is supported",
        ));
    }

    let counts: Vec<usize> = lines[6]
        .split_whitespace()
        .map(|s| s.parse())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| parse_error(origin, "Number of atoms per species (line 7) should be integers"))?;
    if counts.len() != elements.len() {
        return Err(parse_error(
            origin,
            "Mismatch between species (line 6) and atom counts (line 7)",
        ));
    }

    let mut coord_line = 7;
    if lines[coord_line].trim().to_lowercase().starts_with('s') {
        coord_line += 1;
    }
    if lines.len() <= coord_line {
        return Err(parse_error(origin, "Missing coordinate type line"));
    }

    // VASP 只识别首字母
    let coord_type = lines[coord_line].trim().to_lowercase();
    let is_cartesian = coord_type.starts_with('c') || coord_type.starts_with('k');

    let total: usize = counts.iter().sum();
    let mut atoms: Vec<Atom> = Vec::with_capacity(total);
    let mut line_idx = coord_line + 1;

    for (elem, &count) in elements.iter().zip(counts.iter()) {
        for _ in 0..count {
            let parts: Vec<f64> = lines
                .get(line_idx)
                .map(|l| {
                    l.split_whitespace()
                        .take(3)
                        .filter_map(|s| s.parse().ok())
                        .collect()
                })
                .unwrap_or_default();

            if parts.len() < 3 {
                return Err(parse_error(
                    origin,
                    "Mismatch between the number of atoms and the atomic coordinates",
                ));
            }

            let position = if is_cartesian {
                let cart = [parts[0] * scale, parts[1] * scale, parts[2] * scale];
                cart_to_frac(cart, &lattice)
            } else {
                [parts[0], parts[1], parts[2]]
            };
            atoms.push(Atom::new(elem.clone(), position));
            line_idx += 1;
        }
    }

    Ok(Crystal::new(name, lattice, atoms))
}

/// 笛卡尔坐标转分数坐标
fn cart_to_frac(cart: [f64; 3], lattice: &Lattice) -> [f64; 3] {
    let m = lattice.matrix;
    let det = lattice.volume();

    if det.abs() < 1e-10 {
        return cart;
    }

    let inv = [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
        ],
    ];

    // r_frac = r_cart · M^-1（行向量约定）
    [
        cart[0] * inv[0][0] + cart[1] * inv[1][0] + cart[2] * inv[2][0],
        cart[0] * inv[0][1] + cart[1] * inv[1][1] + cart[2] * inv[2][1],
        cart[0] * inv[0][2] + cart[1] * inv[1][2] + cart[2] * inv[2][2],
    ]
}

/// 将 Crystal 转换为 POSCAR 格式字符串
pub fn to_poscar_string(crystal: &Crystal) -> String {
    let species = crystal.species_counts();
    let mut result = String::new();

    let title = if crystal.name.is_empty() {
        crystal.formula()
    } else {
        crystal.name.clone()
    };
    result.push_str(&format!("{}\n", title));
    result.push_str("1.0\n");

    for row in &crystal.lattice.matrix {
        result.push_str(&format!(
            "  {:16.10}  {:16.10}  {:16.10}\n",
            row[0], row[1], row[2]
        ));
    }

    let names: Vec<&str> = species.iter().map(|(el, _)| el.as_str()).collect();
    let counts: Vec<String> = species.iter().map(|(_, n)| n.to_string()).collect();
    result.push_str(&format!("   {}\n", names.join("   ")));
    result.push_str(&format!("   {}\n", counts.join("   ")));
    result.push_str("Direct\n");

    for (elem, _) in &species {
        for atom in crystal.atoms.iter().filter(|a| &a.element == elem) {
            let p = atom.position;
            result.push_str(&format!("  {:16.10}  {:16.10}  {:16.10}\n", p[0], p[1], p[2]));
        }
    }

    result
}

/// 写出 POSCAR 文件
pub fn write_poscar_file(crystal: &Crystal, path: &Path) -> Result<()> {
    fs::write(path, to_poscar_string(crystal)).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAF2: &str = r#"CaF2
1.0
0.0 2.73 2.73
2.73 0.0 2.73
2.73 2.73 0.0
Ca F
1 2
Direct
0.0 0.0 0.0
0.25 0.25 0.25
0.75 0.75 0.75
"#;

    #[test]
    fn test_parse_poscar_vasp5() {
        let crystal = parse_poscar_content(CAF2, "CaF2").unwrap();
        assert_eq!(crystal.name, "CaF2");
        assert_eq!(crystal.atoms.len(), 3);
        assert_eq!(crystal.atoms[0].element, "Ca");
        assert_eq!(crystal.atoms[2].element, "F");
    }

    #[test]
    fn test_parse_poscar_cartesian_with_scale() {
        let content = r#"Si
2.0
2.0 0.0 0.0
0.0 2.0 0.0
0.0 0.0 2.0
Si
2
Cartesian
0.0 0.0 0.0
1.0 1.0 1.0
"#;
        let crystal = parse_poscar_content(content, "Si").unwrap();
        assert!((crystal.lattice.matrix[0][0] - 4.0).abs() < 1e-12);
        let p = crystal.atoms[1].position;
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_poscar_selective_dynamics() {
        let content = r#"Fe
1.0
2.87 0.0 0.0
0.0 2.87 0.0
0.0 0.0 2.87
Fe
2
Selective dynamics
Direct
0.0 0.0 0.0 T T T
0.5 0.5 0.5 F F F
"#;
        let crystal = parse_poscar_content(content, "Fe").unwrap();
        assert_eq!(crystal.atoms.len(), 2);
    }

    #[test]
    fn test_atom_count_mismatch_is_an_error() {
        let truncated = CAF2.replace("0.75 0.75 0.75\n", "");
        let err = parse_poscar_content(&truncated, "CaF2").unwrap_err();
        assert!(matches!(err, VaspflowError::ParseError { .. }));
    }

    #[test]
    fn test_written_poscar_reads_back() {
        let crystal = parse_poscar_content(CAF2, "CaF2").unwrap();
        let parsed = parse_poscar_content(&to_poscar_string(&crystal), "again").unwrap();
        assert_eq!(parsed.species_counts(), crystal.species_counts());
        assert_eq!(parsed.atoms[1].position, [0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_missing_file() {
        let err = parse_poscar_file(Path::new("/nonexistent/CONTCAR")).unwrap_err();
        assert!(matches!(err, VaspflowError::FileNotFound { .. }));
    }
}
