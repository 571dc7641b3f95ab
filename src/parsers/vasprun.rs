//! # VASP vasprun.xml 解析器
//!
//! 逐行扫描 vasprun.xml，提取工作流需要的结构化结果。
//! VASP 输出的 XML 每行只有一个元素（`<c>` 除外），
//! 因此只需跟踪当前所处的块，无需构建完整的 XML 树。
//!
//! ## 提取内容
//! - 运行时间戳（generator 中的 date/time）
//! - 元素组成、原子列表、NBANDS 参数
//! - 每个离子步：自洽能量序列、熵、自由能、受力、应力、晶格向量、体积、自洽耗时
//! - 最后一个离子步的能带本征值和占据数
//! - 费米能
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 中的 `VasprunParser` 使用
//! - 使用 `models/calculation.rs`
//! - 使用 `regex` 提取元素内容

use crate::error::{Result, VaspflowError};
use crate::models::{CalculationData, KpointBands};

use chrono::NaiveDateTime;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

struct Patterns {
    item: Regex,
    vector: Regex,
    row: Regex,
    cell: Regex,
    varray: Regex,
    array: Regex,
    time_total: Regex,
    spin_set: Regex,
    kpoint_set: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        item: Regex::new(r#"<i\b[^>]*\bname="([^"]+)"[^>]*>([^<]*)</i>"#).unwrap(),
        vector: Regex::new(r"<v\b[^>]*>([^<]*)</v>").unwrap(),
        row: Regex::new(r"<r>([^<]*)</r>").unwrap(),
        cell: Regex::new(r"<c>([^<]*)</c>").unwrap(),
        varray: Regex::new(r#"<varray\b[^>]*\bname="([^"]+)""#).unwrap(),
        array: Regex::new(r#"<array\b[^>]*\bname="([^"]+)""#).unwrap(),
        time_total: Regex::new(r#"<time\b[^>]*\bname="total"[^>]*>([^<]*)</time>"#).unwrap(),
        spin_set: Regex::new(r#"<set\b[^>]*comment="spin\s*(\d+)""#).unwrap(),
        kpoint_set: Regex::new(r#"<set\b[^>]*comment="kpoint\s*(\d+)""#).unwrap(),
    })
}

/// 当前所在的块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    AtomsArray,
    AtomTypesArray,
    Basis,
    Forces,
    Stress,
}

/// 单个离子步的累积数据
#[derive(Default)]
struct IonicStep {
    scf_energies: Vec<f64>,
    looptimes: Vec<f64>,
    entropy: Option<f64>,
    free_energy: Option<f64>,
    forces: Vec<[f64; 3]>,
    stress: Vec<[f64; 3]>,
    basis: Vec<[f64; 3]>,
    volume: Option<f64>,
}

/// 解析 vasprun.xml 文件
pub fn parse_vasprun(path: &Path) -> Result<CalculationData> {
    if !path.is_file() {
        return Err(VaspflowError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let content = fs::read_to_string(path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_vasprun_content(&content, &path.display().to_string())
}

fn parse_error(origin: &str, reason: impl Into<String>) -> VaspflowError {
    VaspflowError::ParseError {
        format: "vasprun.xml".to_string(),
        path: origin.to_string(),
        reason: reason.into(),
    }
}

fn parse_f64(text: &str, origin: &str) -> Result<f64> {
    let text = text.trim();
    text.parse()
        .map_err(|_| parse_error(origin, format!("'{}' is not a number", text)))
}

fn parse_triplet(text: &str, origin: &str) -> Result<[f64; 3]> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|s| parse_f64(s, origin))
        .collect::<Result<_>>()?;
    if values.len() < 3 {
        return Err(parse_error(origin, format!("expected 3 components in '{}'", text.trim())));
    }
    Ok([values[0], values[1], values[2]])
}

/// 一行 `<rc>` 中所有 `<c>` 的内容
fn cell_values<'a>(pattern: &Regex, line: &'a str) -> Vec<&'a str> {
    pattern
        .captures_iter(line)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .collect()
}

fn to_matrix(rows: &[[f64; 3]]) -> Option<[[f64; 3]; 3]> {
    match rows {
        [a, b, c, ..] => Some([*a, *b, *c]),
        _ => None,
    }
}

/// 从字符串内容解析 vasprun.xml
pub fn parse_vasprun_content(content: &str, origin: &str) -> Result<CalculationData> {
    let p = patterns();
    let mut data = CalculationData::default();

    let mut date: Option<String> = None;
    let mut time: Option<String> = None;

    let mut block = Block::None;
    let mut step: Option<IonicStep> = None;
    let mut in_scstep = false;
    let mut in_eigenvalues = false;
    let mut spin: Option<String> = None;
    let mut kpoint: Option<usize> = None;

    let mut steps: Vec<IonicStep> = Vec::new();

    for line in content.lines() {
        let t = line.trim();

        if t.starts_with("<calculation") {
            step = Some(IonicStep::default());
            continue;
        }
        if t.starts_with("</calculation") {
            if let Some(s) = step.take() {
                steps.push(s);
            }
            continue;
        }
        if t.starts_with("<scstep") {
            in_scstep = true;
            continue;
        }
        if t.starts_with("</scstep") {
            in_scstep = false;
            continue;
        }
        if t.starts_with("<eigenvalues") {
            in_eigenvalues = true;
            data.band_occupations.clear();
            continue;
        }
        if t.starts_with("</eigenvalues") {
            in_eigenvalues = false;
            spin = None;
            kpoint = None;
            continue;
        }
        if t.starts_with("</array") || t.starts_with("</varray") {
            block = Block::None;
            continue;
        }

        if let Some(caps) = p.array.captures(t) {
            block = match &caps[1] {
                "atoms" => Block::AtomsArray,
                "atomtypes" => Block::AtomTypesArray,
                _ => Block::None,
            };
            continue;
        }
        if let Some(caps) = p.varray.captures(t) {
            block = match (&caps[1], step.is_some()) {
                ("basis", true) => Block::Basis,
                ("forces", true) => Block::Forces,
                ("stress", true) => Block::Stress,
                _ => Block::None,
            };
            continue;
        }

        if in_eigenvalues {
            if let Some(caps) = p.spin_set.captures(t) {
                spin = Some(format!("spin_{}", &caps[1]));
                continue;
            }
            if let Some(caps) = p.kpoint_set.captures(t) {
                kpoint = caps[1].parse().ok();
                continue;
            }
            if let (Some(caps), Some(s), Some(k)) = (p.row.captures(t), &spin, kpoint) {
                let values: Vec<f64> = caps[1]
                    .split_whitespace()
                    .map(|v| parse_f64(v, origin))
                    .collect::<Result<_>>()?;
                if values.len() >= 2 {
                    let bands = data
                        .band_occupations
                        .entry(s.clone())
                        .or_default()
                        .entry(k)
                        .or_insert_with(KpointBands::default);
                    bands.band_energies.push(values[0]);
                    bands.occupations.push(values[1]);
                }
                continue;
            }
        }

        match block {
            Block::AtomsArray => {
                let cells = cell_values(&p.cell, t);
                if let Some(element) = cells.first() {
                    data.atoms.push(element.to_string());
                }
                continue;
            }
            Block::AtomTypesArray => {
                let cells = cell_values(&p.cell, t);
                if cells.len() >= 2 {
                    let count: usize = cells[0].parse().map_err(|_| {
                        parse_error(origin, format!("bad atom count '{}'", cells[0]))
                    })?;
                    data.composition.insert(cells[1].to_string(), count);
                }
                continue;
            }
            Block::Basis | Block::Forces | Block::Stress => {
                if let (Some(caps), Some(s)) = (p.vector.captures(t), step.as_mut()) {
                    let v = parse_triplet(&caps[1], origin)?;
                    match block {
                        Block::Basis => s.basis.push(v),
                        Block::Forces => s.forces.push(v),
                        _ => s.stress.push(v),
                    }
                }
                continue;
            }
            Block::None => {}
        }

        if let Some(caps) = p.time_total.captures(t) {
            if let (true, Some(s)) = (in_scstep, step.as_mut()) {
                // cpu 和 wall 两列，取 wall
                if let Some(wall) = caps[1].split_whitespace().last() {
                    s.looptimes.push(parse_f64(wall, origin)?);
                }
            }
            continue;
        }

        if let Some(caps) = p.item.captures(t) {
            let value = &caps[2];
            match (&caps[1], step.as_mut()) {
                ("date", None) => date = Some(value.trim().to_string()),
                ("time", None) => time = Some(value.trim().to_string()),
                ("NBANDS", _) => data.n_bands = value.trim().parse().ok(),
                ("efermi", _) => data.fermi_energy = Some(parse_f64(value, origin)?),
                ("e_fr_energy", Some(s)) => {
                    let e = parse_f64(value, origin)?;
                    if in_scstep {
                        s.scf_energies.push(e);
                    } else {
                        s.free_energy = Some(e);
                    }
                }
                ("eentropy", Some(s)) if in_scstep => {
                    s.entropy = Some(parse_f64(value, origin)?);
                }
                ("volume", Some(s)) => s.volume = Some(parse_f64(value, origin)?),
                _ => {}
            }
        }
    }

    // 被中断的运行：保留未闭合的最后一个离子步
    if let Some(s) = step.take() {
        if !s.scf_energies.is_empty() {
            steps.push(s);
        }
    }

    if steps.is_empty() {
        return Err(parse_error(origin, "no ionic steps found"));
    }

    data.run_timestamp = match (date, time) {
        (Some(d), Some(t)) => {
            NaiveDateTime::parse_from_str(&format!("{} {}", d, t), "%Y %m %d %H:%M:%S").ok()
        }
        _ => None,
    };

    data.n_ionic_steps = steps.len();
    for s in steps {
        data.scf_energies.push(s.scf_energies);
        data.scf_looptimes.push(s.looptimes);
        data.entropies.push(s.entropy);
        data.free_energies.push(s.free_energy);
        data.forces.push(s.forces);
        if let Some(m) = to_matrix(&s.stress) {
            data.stress_tensors.push(m);
        }
        if let Some(m) = to_matrix(&s.basis) {
            data.lattice_vectors.push(m);
        }
        if let Some(v) = s.volume {
            data.cell_volumes.push(v);
        }
    }

    Ok(data)
}
