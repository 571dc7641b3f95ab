//! # 检查点管理
//!
//! 在下一次尝试覆盖工作目录之前，把上一次尝试的输出移动到
//! `attempt_<YYYYmmddHHMMSS>` 子目录中。只移动和复制，从不删除数据。
//! CHGCAR 和 POTCAR 采用复制，留在原处供重启读取；阶段的输入结构
//! `init_structure.vasp` 从不移动。上一阶段交来的电荷密度另存为
//! `CHGCAR.handoff`，静态阶段重试前据此恢复。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 和 `workflow/recipe.rs` 使用
//! - 使用 `parsers/poscar.rs` 读取重启结构
//! - 使用 `chrono` 生成备份目录时间戳

use crate::error::{Result, VaspflowError};
use crate::models::Crystal;
use crate::parsers::poscar;
use crate::parsers::OUTCAR_FILE;
use crate::workflow::StageKind;

use std::fs;
use std::path::{Path, PathBuf};

/// 阶段输入结构文件名
pub const INPUT_GEOMETRY_FILE: &str = "init_structure.vasp";

/// 弛豫输出结构文件名
pub const RELAXED_GEOMETRY_FILE: &str = "CONTCAR";

/// 电荷密度文件（复制而不是移动）
pub const CHARGE_DENSITY_FILE: &str = "CHGCAR";

/// 赝势文件（复制而不是移动，下一次尝试还要用）
pub const POTENTIAL_FILE: &str = "POTCAR";

/// 上一阶段交接来的电荷密度副本，单点重试时恢复
pub const HANDED_DENSITY_FILE: &str = "CHGCAR.handoff";

/// 备份时复制、原位保留的文件
pub const KEPT_INPUTS: &[&str] = &[CHARGE_DENSITY_FILE, POTENTIAL_FILE];

/// 备份时移动的求解器文件
pub const ARTIFACTS: &[&str] = &[
    "INCAR",
    "KPOINTS",
    "POSCAR",
    "CONTCAR",
    "OUTCAR",
    "OSZICAR",
    "vasprun.xml",
    "EIGENVAL",
    "DOSCAR",
    "IBZKPT",
    "PCDAT",
    "XDATCAR",
    "REPORT",
    "PROCAR",
    "CHG",
    "WAVECAR",
    "stdout.txt",
    "stderr.txt",
];

const BACKUP_PREFIX: &str = "attempt_";

/// 单个工作目录的检查点
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    input_geometry: PathBuf,
}

impl CheckpointManager {
    /// 输入结构默认为 `<dir>/init_structure.vasp`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let input_geometry = dir.join(INPUT_GEOMETRY_FILE);
        Self { dir, input_geometry }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_geometry(&self) -> &Path {
        &self.input_geometry
    }

    /// 是否存在上一次运行（非空 OUTCAR）
    pub fn has_previous_run(&self) -> bool {
        is_non_empty(&self.dir.join(OUTCAR_FILE))
    }

    /// 备份上一次尝试的输出
    ///
    /// 输出文件移入备份目录；CHGCAR 和 POTCAR 只复制，原位保留。
    /// 没有任何求解器输出时不创建目录，返回 `None`。
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        let present: Vec<&str> = ARTIFACTS
            .iter()
            .copied()
            .filter(|name| self.dir.join(name).is_file())
            .collect();

        if present.is_empty() {
            return Ok(None);
        }

        let target = self.fresh_backup_dir();
        fs::create_dir_all(&target).map_err(|e| VaspflowError::FileWriteError {
            path: target.display().to_string(),
            source: e,
        })?;

        for name in present {
            let from = self.dir.join(name);
            let to = target.join(name);
            fs::rename(&from, &to).map_err(|e| VaspflowError::FileWriteError {
                path: to.display().to_string(),
                source: e,
            })?;
        }

        for name in KEPT_INPUTS {
            let from = self.dir.join(name);
            if from.is_file() {
                copy_file(&from, &target.join(name))?;
            }
        }

        log::info!("backed up previous attempt to {}", target.display());
        Ok(Some(target))
    }

    /// 保存交接来的 CHGCAR 副本，返回是否存在 CHGCAR
    pub fn keep_handed_density(&self) -> Result<bool> {
        let chgcar = self.dir.join(CHARGE_DENSITY_FILE);
        if !chgcar.is_file() {
            return Ok(false);
        }
        copy_file(&chgcar, &self.dir.join(HANDED_DENSITY_FILE))?;
        Ok(true)
    }

    /// 用交接副本覆盖上一次尝试写出的 CHGCAR，返回是否恢复
    pub fn restore_handed_density(&self) -> Result<bool> {
        let handed = self.dir.join(HANDED_DENSITY_FILE);
        if !handed.is_file() {
            return Ok(false);
        }
        copy_file(&handed, &self.dir.join(CHARGE_DENSITY_FILE))?;
        Ok(true)
    }

    /// 下一次尝试的起始结构
    ///
    /// 弛豫阶段优先使用非空的 CONTCAR，否则回退到阶段输入结构；
    /// 单点阶段的结构从不改变。两者都不存在时报错。
    pub fn resolve_restart_structure(&self, kind: StageKind) -> Result<Crystal> {
        if kind.is_relaxation() {
            if let Some(relaxed) = self.relaxed_structure()? {
                return Ok(relaxed);
            }
        }

        if self.input_geometry.is_file() {
            return poscar::parse_poscar_file(&self.input_geometry);
        }

        Err(VaspflowError::MissingGeometry {
            dir: self.dir.display().to_string(),
            input: self.input_geometry.display().to_string(),
        })
    }

    /// 非空 CONTCAR 中的结构
    pub fn relaxed_structure(&self) -> Result<Option<Crystal>> {
        let contcar = self.dir.join(RELAXED_GEOMETRY_FILE);
        if !is_non_empty(&contcar) {
            return Ok(None);
        }
        log::debug!("reading relaxed geometry from {}", contcar.display());
        poscar::parse_poscar_file(&contcar).map(Some)
    }

    /// 续算时的起始结构：CONTCAR，其次 POSCAR
    pub fn resume_structure(&self) -> Result<Option<Crystal>> {
        for name in [RELAXED_GEOMETRY_FILE, "POSCAR"] {
            let path = self.dir.join(name);
            if is_non_empty(&path) {
                return poscar::parse_poscar_file(&path).map(Some);
            }
        }
        Ok(None)
    }

    fn fresh_backup_dir(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let base = self.dir.join(format!("{}{}", BACKUP_PREFIX, stamp));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.dir.join(format!("{}{}_{}", BACKUP_PREFIX, stamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).map_or(false, |m| m.is_file() && m.len() > 0)
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| VaspflowError::FileWriteError {
            path: to.display().to_string(),
            source: e,
        })
}
