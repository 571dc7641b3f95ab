//! # 态密度数据模型
//!
//! 总态密度网格及其带边分析：金属判断、价带顶、导带底和带隙。
//! 能量网格相对费米能存储，费米能处为 0。
//!
//! ## 依赖关系
//! - 由 `parsers/dos.rs` 生成
//! - 被 `commands/herd.rs` 使用

/// 判断某能量处有无电子态的默认阈值（states/eV）
pub const DEFAULT_DOS_TOLERANCE: f64 = 1e-3;

/// 总态密度
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DensityOfStates {
    /// 费米能 (eV)，未平移
    pub fermi_energy: f64,
    /// 相对费米能的能量网格 (eV)
    pub energies: Vec<f64>,
    /// 每个自旋通道的总态密度
    pub total: Vec<Vec<f64>>,
    /// 每个自旋通道的积分态密度
    pub integrated: Vec<Vec<f64>>,
}

impl DensityOfStates {
    pub fn is_empty(&self) -> bool {
        self.energies.is_empty() || self.total.is_empty()
    }

    /// 自旋通道数
    pub fn n_spins(&self) -> usize {
        self.total.len()
    }

    /// 网格点上各自旋通道之和
    pub fn summed(&self, index: usize) -> f64 {
        self.total
            .iter()
            .filter_map(|channel| channel.get(index))
            .sum()
    }

    /// 最接近费米能的网格点
    fn fermi_index(&self) -> Option<usize> {
        self.energies
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map(|(i, _)| i)
    }

    /// 费米能两侧相邻的两个网格点都有电子态即为金属
    pub fn is_metal(&self, tol: f64) -> bool {
        let Some(index) = self.fermi_index() else {
            return false;
        };
        let bracket = if self.energies[index] > 0.0 {
            index.checked_sub(1)
        } else {
            Some(index + 1).filter(|&i| i < self.energies.len())
        };
        let Some(bracket) = bracket else {
            return false;
        };
        self.summed(index) > tol && self.summed(bracket) > tol
    }

    /// 价带顶（相对费米能），金属或找不到时为 None
    pub fn find_vbm(&self, tol: f64) -> Option<f64> {
        if self.is_metal(tol) {
            return None;
        }
        let mut index = self.fermi_index()?;
        if self.energies[index] < 0.0 && index + 1 < self.energies.len() {
            index += 1;
        }
        loop {
            if self.summed(index) >= tol {
                return Some(self.energies[index]);
            }
            index = index.checked_sub(1)?;
        }
    }

    /// 导带底（相对费米能），金属或找不到时为 None
    pub fn find_cbm(&self, tol: f64) -> Option<f64> {
        if self.is_metal(tol) {
            return None;
        }
        let mut index = self.fermi_index()?;
        if self.energies[index] > 0.0 && index > 0 {
            index -= 1;
        }
        while index < self.energies.len() {
            if self.summed(index) >= tol {
                return Some(self.energies[index]);
            }
            index += 1;
        }
        None
    }

    /// 带隙；金属为 0，带边缺失时为 None
    pub fn calculate_band_gap(&self, tol: f64) -> Option<f64> {
        if self.is_metal(tol) {
            return Some(0.0);
        }
        Some(self.find_cbm(tol)? - self.find_vbm(tol)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// -3..=3 eV、步长 0.5 的网格，`gap` 内没有电子态
    fn grid(gap: (f64, f64)) -> DensityOfStates {
        let energies: Vec<f64> = (0..13).map(|i| -3.0 + 0.5 * i as f64).collect();
        let total = energies
            .iter()
            .map(|&e| if e > gap.0 && e < gap.1 { 0.0 } else { 1.5 })
            .collect();
        DensityOfStates {
            fermi_energy: 4.2,
            energies,
            total: vec![total],
            integrated: Vec::new(),
        }
    }

    #[test]
    fn test_insulator_edges() {
        let dos = grid((-1.0, 1.5));
        assert!(!dos.is_metal(DEFAULT_DOS_TOLERANCE));
        assert_eq!(dos.find_vbm(DEFAULT_DOS_TOLERANCE), Some(-1.0));
        assert_eq!(dos.find_cbm(DEFAULT_DOS_TOLERANCE), Some(1.5));
        assert_eq!(dos.calculate_band_gap(DEFAULT_DOS_TOLERANCE), Some(2.5));
    }

    #[test]
    fn test_metal_has_zero_gap() {
        let dos = grid((10.0, 11.0));
        assert!(dos.is_metal(DEFAULT_DOS_TOLERANCE));
        assert_eq!(dos.find_vbm(DEFAULT_DOS_TOLERANCE), None);
        assert_eq!(dos.find_cbm(DEFAULT_DOS_TOLERANCE), None);
        assert_eq!(dos.calculate_band_gap(DEFAULT_DOS_TOLERANCE), Some(0.0));
    }

    #[test]
    fn test_spin_channels_are_summed() {
        let mut dos = grid((-1.0, 1.5));
        let half: Vec<f64> = dos.total[0].iter().map(|d| d / 2.0).collect();
        dos.total = vec![half.clone(), half];
        assert_eq!(dos.n_spins(), 2);
        assert_eq!(dos.summed(0), 1.5);
        assert_eq!(dos.calculate_band_gap(DEFAULT_DOS_TOLERANCE), Some(2.5));
    }

    #[test]
    fn test_empty_grid() {
        let dos = DensityOfStates::default();
        assert!(dos.is_empty());
        assert!(!dos.is_metal(DEFAULT_DOS_TOLERANCE));
        assert_eq!(dos.calculate_band_gap(DEFAULT_DOS_TOLERANCE), None);
    }
}
