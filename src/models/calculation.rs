//! # VASP 计算结果数据模型
//!
//! 一次求解器调用的不可变结果，由 `parsers/vasprun.rs` 生成，
//! 序列化为每个阶段的 `<stage>_data.json`。
//!
//! 序列化约定：数组写成嵌套列表，运行时间戳写成定宽数字字符串
//! `YYYYMMDDHHMM`。
//!
//! ## 依赖关系
//! - 被 `parsers/vasprun.rs`, `parsers/outcar.rs` 使用
//! - 被 `workflow/convergence.rs`, `workflow/remediation.rs`, `commands/herd.rs` 使用

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个 k 点上的能带
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpointBands {
    /// 本征值 (eV)
    pub band_energies: Vec<f64>,
    /// 占据数
    pub occupations: Vec<f64>,
}

/// VASP 计算结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationData {
    /// 运行开始时间
    #[serde(with = "timestamp")]
    pub run_timestamp: Option<NaiveDateTime>,

    /// 元素 -> 原子数
    pub composition: BTreeMap<String, usize>,

    /// 原子列表（按 POSCAR 顺序）
    pub atoms: Vec<String>,

    /// 离子步数
    pub n_ionic_steps: usize,

    /// 每个离子步的自洽能量序列 (eV)
    pub scf_energies: Vec<Vec<f64>>,

    /// 每个离子步结束时的熵项 (eV)
    pub entropies: Vec<Option<f64>>,

    /// 每个离子步结束时的自由能 (eV)
    pub free_energies: Vec<Option<f64>>,

    /// 每个离子步的原子受力 (eV/Å)
    pub forces: Vec<Vec<[f64; 3]>>,

    /// 每个离子步的应力张量 (kBar)
    pub stress_tensors: Vec<[[f64; 3]; 3]>,

    /// 每个离子步的晶格向量 (Å)
    pub lattice_vectors: Vec<[[f64; 3]; 3]>,

    /// 每个离子步的晶胞体积 (Å³)
    pub cell_volumes: Vec<f64>,

    /// 费米能 (eV)
    pub fermi_energy: Option<f64>,

    /// 最后一个离子步的能带占据：自旋 -> k 点 -> 能带
    pub band_occupations: BTreeMap<String, BTreeMap<usize, KpointBands>>,

    /// 每个离子步中各自洽步的耗时 (s)
    pub scf_looptimes: Vec<Vec<f64>>,

    /// 实际使用的能带数
    pub n_bands: Option<u32>,

    /// OUTCAR 中是否出现计时统计（正常结束）
    pub is_finished: bool,
}

impl CalculationData {
    /// 总运行时间 (s)
    pub fn total_runtime(&self) -> f64 {
        self.scf_looptimes.iter().flatten().sum()
    }

    /// 最后一个离子步的自由能
    pub fn final_energy(&self) -> Option<f64> {
        self.free_energies.iter().rev().flatten().next().copied()
    }

    /// 每原子能量
    pub fn energy_per_atom(&self) -> Option<f64> {
        match (self.final_energy(), self.atoms.len()) {
            (Some(e), n) if n > 0 => Some(e / n as f64),
            _ => None,
        }
    }

    /// 最后一个离子步的自洽能量序列
    pub fn final_scf_energies(&self) -> &[f64] {
        self.scf_energies.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// 最后一个离子步中最大的原子受力模长
    pub fn max_residual_force(&self) -> Option<f64> {
        let last = self.forces.last()?;
        last.iter()
            .map(|f| (f[0] * f[0] + f[1] * f[1] + f[2] * f[2]).sqrt())
            .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
    }

    /// 所有自旋和 k 点中最高能带的最大占据数
    pub fn highest_band_occupation(&self) -> Option<f64> {
        self.band_occupations
            .values()
            .flat_map(|kpoints| kpoints.values())
            .filter_map(|bands| bands.occupations.last().copied())
            .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
    }
}

/// 时间戳的定宽字符串序列化
mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y%m%d%H%M";

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => NaiveDateTime::parse_from_str(&s, FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
