//! # 求解器输入生成
//!
//! 根据结构和参数写出 INCAR、POSCAR、POTCAR。k 点由 INCAR 中的
//! KSPACING 决定，不写 KPOINTS。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 使用
//! - 使用 `parsers/poscar.rs` 写出结构

use crate::error::{Result, VaspflowError};
use crate::models::{CalculationSettings, Crystal};
use crate::parsers::poscar;
use crate::workflow::checkpoint::POTENTIAL_FILE;

use std::fs;
use std::path::{Path, PathBuf};

/// 输入文件生成接口
pub trait InputGenerator {
    /// 把结构和参数写成求解器输入文件
    fn write_inputs(&self, crystal: &Crystal, settings: &CalculationSettings, dir: &Path)
        -> Result<()>;
}

/// VASP 输入文件生成器
#[derive(Debug, Clone, Default)]
pub struct VaspInputGenerator {
    /// 赝势库根目录，`<potcar_dir>/<元素>/POTCAR`
    potcar_dir: Option<PathBuf>,
}

impl VaspInputGenerator {
    pub fn new(potcar_dir: Option<PathBuf>) -> Self {
        Self { potcar_dir }
    }

    fn write_potcar(&self, crystal: &Crystal, dir: &Path) -> Result<()> {
        let target = dir.join(POTENTIAL_FILE);

        let library = match &self.potcar_dir {
            Some(library) => library,
            None if target.is_file() => {
                log::debug!("no POTCAR library configured, keeping {}", target.display());
                return Ok(());
            }
            None => {
                let species: Vec<String> =
                    crystal.species_counts().into_iter().map(|(el, _)| el).collect();
                return Err(VaspflowError::MissingPotential {
                    species: species.join(" "),
                    path: "<no POTCAR library configured>".to_string(),
                });
            }
        };

        let mut combined = String::new();
        for (element, _) in crystal.species_counts() {
            let source = library.join(&element).join("POTCAR");
            if !source.is_file() {
                return Err(VaspflowError::MissingPotential {
                    species: element,
                    path: source.display().to_string(),
                });
            }
            let text = fs::read_to_string(&source).map_err(|e| VaspflowError::FileReadError {
                path: source.display().to_string(),
                source: e,
            })?;
            combined.push_str(&text);
        }

        write_text(&target, &combined)
    }
}

impl InputGenerator for VaspInputGenerator {
    fn write_inputs(
        &self,
        crystal: &Crystal,
        settings: &CalculationSettings,
        dir: &Path,
    ) -> Result<()> {
        write_text(&dir.join("INCAR"), &incar_string(settings))?;
        poscar::write_poscar_file(crystal, &dir.join("POSCAR"))?;
        self.write_potcar(crystal, dir)
    }
}

/// INCAR 文本：每个指令一行
pub fn incar_string(settings: &CalculationSettings) -> String {
    settings
        .iter()
        .map(|(key, value)| format!("{:<14} = {}\n", key.to_uppercase(), value.to_incar()))
        .collect()
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
