//! # 计算配方
//!
//! 配方是按顺序执行的阶段列表。每个阶段收敛后：
//! - 把计算数据写入 `<run>/<stage>_data.json`，尝试历史写入 `<run>/<stage>_attempts.json`
//! - 把最终结构、指定的求解器文件（CHGCAR）和参数键交给下一个阶段
//!
//! 运行目录中的 POTCAR 会复制到各阶段子目录。
//!
//! 任一阶段未收敛时配方停止，结果标记为未收敛（不是错误）。
//!
//! ## 依赖关系
//! - 被 `commands/graze.rs` 使用
//! - 使用 `workflow/stage.rs` 运行单个阶段
//! - 使用 `serde_json` 写出结果文件

use crate::error::{Result, VaspflowError};
use crate::models::{Crystal, SettingValue, SettingsRegistry};
use crate::parsers::poscar;
use crate::workflow::checkpoint::{
    CheckpointManager, CHARGE_DENSITY_FILE, INPUT_GEOMETRY_FILE, POTENTIAL_FILE,
};
use crate::workflow::stage::{AttemptRecord, Collaborators, StageMachine, StageOutcome};
use crate::workflow::StageKind;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 可用的计算配方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowRecipe {
    Relaxation,
    Static,
    RelaxationThenStatic,
    StandardizedRelax,
    SupercellForces,
}

/// 阶段交给下一阶段的内容（结构总是传递）
#[derive(Debug, Clone, Copy)]
pub struct Handoff {
    pub files: &'static [&'static str],
    pub settings_keys: &'static [&'static str],
}

/// 配方中的一个阶段
#[derive(Debug, Clone, Copy)]
pub struct StagePlan {
    pub kind: StageKind,
    /// 运行目录下的私有子目录；`None` 表示直接在运行目录中计算
    pub subdir: Option<&'static str>,
    pub handoff: Option<Handoff>,
}

const RELAX_TO_STATIC: Handoff = Handoff {
    files: &[CHARGE_DENSITY_FILE],
    settings_keys: &["symprec", "nbands"],
};

impl WorkflowRecipe {
    pub const ALL: [WorkflowRecipe; 5] = [
        WorkflowRecipe::Relaxation,
        WorkflowRecipe::Static,
        WorkflowRecipe::RelaxationThenStatic,
        WorkflowRecipe::StandardizedRelax,
        WorkflowRecipe::SupercellForces,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WorkflowRecipe::Relaxation => "relaxation",
            WorkflowRecipe::Static => "static",
            WorkflowRecipe::RelaxationThenStatic => "relaxation+static",
            WorkflowRecipe::StandardizedRelax => "acc_std_relax",
            WorkflowRecipe::SupercellForces => "sc_forces",
        }
    }

    /// 阶段列表
    pub fn stages(self) -> Vec<StagePlan> {
        let relaxation = StagePlan {
            kind: StageKind::Relaxation,
            subdir: Some("relaxation"),
            handoff: None,
        };
        let static_run = StagePlan {
            kind: StageKind::Static,
            subdir: Some("static"),
            handoff: None,
        };

        match self {
            WorkflowRecipe::Relaxation => vec![relaxation],
            WorkflowRecipe::Static => vec![static_run],
            WorkflowRecipe::RelaxationThenStatic => vec![
                StagePlan {
                    handoff: Some(RELAX_TO_STATIC),
                    ..relaxation
                },
                static_run,
            ],
            WorkflowRecipe::StandardizedRelax => vec![StagePlan {
                kind: StageKind::StandardizedRelax,
                subdir: None,
                handoff: None,
            }],
            WorkflowRecipe::SupercellForces => vec![StagePlan {
                kind: StageKind::SupercellForces,
                subdir: None,
                handoff: None,
            }],
        }
    }
}

impl fmt::Display for WorkflowRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for WorkflowRecipe {
    type Err = VaspflowError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        WorkflowRecipe::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| VaspflowError::UnknownWorkflow(s.to_string()))
    }
}

/// 单个阶段的摘要
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub kind: StageKind,
    pub converged: bool,
    pub attempts: usize,
    pub final_energy: Option<f64>,
    pub data_file: PathBuf,
}

/// 配方运行结果
#[derive(Debug, Clone)]
pub struct RecipeReport {
    pub recipe: WorkflowRecipe,
    pub stages: Vec<StageSummary>,
    /// 所有阶段均收敛
    pub converged: bool,
}

/// 配方驱动器
///
/// 持有阶段参数注册表：跨阶段修复（NBANDS）和交接的参数键都写在这里。
pub struct RecipeDriver<'a> {
    run_dir: PathBuf,
    collaborators: Collaborators<'a>,
    registry: SettingsRegistry,
    from_scratch: bool,
    max_attempts: BTreeMap<StageKind, usize>,
}

impl<'a> RecipeDriver<'a> {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        collaborators: Collaborators<'a>,
        registry: SettingsRegistry,
    ) -> Self {
        Self {
            run_dir: run_dir.into(),
            collaborators,
            registry,
            from_scratch: false,
            max_attempts: BTreeMap::new(),
        }
    }

    /// 删除阶段私有子目录后重新开始
    pub fn with_from_scratch(mut self, from_scratch: bool) -> Self {
        self.from_scratch = from_scratch;
        self
    }

    pub fn with_max_attempts(mut self, kind: StageKind, max_attempts: usize) -> Self {
        self.max_attempts.insert(kind, max_attempts);
        self
    }

    pub fn registry(&self) -> &SettingsRegistry {
        &self.registry
    }

    /// 依次运行配方中的阶段
    pub fn run(&mut self, recipe: WorkflowRecipe, structure: Crystal) -> Result<RecipeReport> {
        if !self.run_dir.is_dir() {
            return Err(VaspflowError::DirectoryNotFound {
                path: self.run_dir.display().to_string(),
            });
        }

        let mut report = RecipeReport {
            recipe,
            stages: Vec::new(),
            converged: true,
        };
        let mut structure = structure;
        let mut carried_files: Vec<PathBuf> = Vec::new();

        for plan in recipe.stages() {
            let stage_dir = self.prepare_stage_dir(&plan)?;
            if plan.subdir.is_some() {
                self.share_potential(&stage_dir)?;
            }
            let mut handed_density = false;
            for source in carried_files.drain(..) {
                handed_density |= source.ends_with(CHARGE_DENSITY_FILE);
                copy_into(&source, &stage_dir)?;
            }
            if handed_density {
                CheckpointManager::new(&stage_dir).keep_handed_density()?;
            }

            let start = self.starting_structure(&plan, &stage_dir, structure)?;
            let outcome = self.run_stage(&plan, &stage_dir, start)?;

            let data_file = self.write_artifacts(&outcome)?;
            report.stages.push(StageSummary {
                kind: plan.kind,
                converged: outcome.converged,
                attempts: outcome.attempts.len(),
                final_energy: outcome.data.final_energy(),
                data_file,
            });

            if !outcome.converged {
                log::warn!("{} did not converge, stopping {}", plan.kind, recipe);
                report.converged = false;
                return Ok(report);
            }

            if let Some(handoff) = plan.handoff {
                carried_files = handoff
                    .files
                    .iter()
                    .map(|name| stage_dir.join(name))
                    .filter(|path| path.is_file())
                    .collect();
                self.hand_over_settings(&outcome, handoff.settings_keys);
            }
            structure = outcome.final_structure;
        }

        Ok(report)
    }

    fn stage_dir(&self, plan: &StagePlan) -> PathBuf {
        match plan.subdir {
            Some(sub) => self.run_dir.join(sub),
            None => self.run_dir.clone(),
        }
    }

    /// 创建阶段目录；从头计算时只删除私有子目录
    fn prepare_stage_dir(&self, plan: &StagePlan) -> Result<PathBuf> {
        let dir = self.stage_dir(plan);

        if self.from_scratch && plan.subdir.is_some() && dir.exists() {
            log::info!("removing {} to start from scratch", dir.display());
            fs::remove_dir_all(&dir).map_err(|e| VaspflowError::FileWriteError {
                path: dir.display().to_string(),
                source: e,
            })?;
        }

        fs::create_dir_all(&dir).map_err(|e| VaspflowError::FileWriteError {
            path: dir.display().to_string(),
            source: e,
        })?;
        Ok(dir)
    }

    /// 运行目录中的 POTCAR 复制到阶段子目录（子目录已有时保留）
    fn share_potential(&self, stage_dir: &Path) -> Result<()> {
        let shared = self.run_dir.join(POTENTIAL_FILE);
        if shared.is_file() && !stage_dir.join(POTENTIAL_FILE).is_file() {
            log::debug!("copying {} into {}", shared.display(), stage_dir.display());
            copy_into(&shared, stage_dir)?;
        }
        Ok(())
    }

    /// 确定阶段的起始结构并写出 `init_structure.vasp`
    ///
    /// 存在上一次运行时先备份；弛豫阶段从上一次的 CONTCAR（或 POSCAR）续算。
    fn starting_structure(
        &self,
        plan: &StagePlan,
        stage_dir: &Path,
        handed: Crystal,
    ) -> Result<Crystal> {
        let checkpoint = CheckpointManager::new(stage_dir);
        let mut start = handed;

        if !self.from_scratch && checkpoint.has_previous_run() {
            if plan.kind.is_relaxation() {
                if let Some(previous) = checkpoint.resume_structure()? {
                    log::info!("resuming {} from previous geometry", plan.kind);
                    start = previous;
                }
            }
            checkpoint.backup()?;
        }

        let input = checkpoint.input_geometry();
        if plan.subdir.is_some() || !input.exists() {
            poscar::write_poscar_file(&start, input)?;
        }
        Ok(start)
    }

    fn run_stage(&mut self, plan: &StagePlan, stage_dir: &Path, start: Crystal) -> Result<StageOutcome> {
        let mut settings = self.registry.settings_for(plan.kind);
        if plan.kind == StageKind::Static
            && stage_dir.join(CHARGE_DENSITY_FILE).is_file()
            && !self.registry.overrides_for(plan.kind).contains("icharg")
        {
            settings.set("icharg", SettingValue::Int(1));
        }

        let max_attempts = self
            .max_attempts
            .get(&plan.kind)
            .copied()
            .unwrap_or_else(|| plan.kind.default_max_attempts());

        log::info!(
            "starting {} in {} (max {} attempts)",
            plan.kind,
            stage_dir.display(),
            max_attempts
        );

        let mut machine = StageMachine::new(plan.kind, stage_dir, settings, self.collaborators)
            .with_max_attempts(max_attempts);

        match machine.run(start, &mut self.registry) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // 致命错误时仍保留尝试历史
                if let Err(write_err) = self.write_attempts(plan.kind, machine.attempts()) {
                    log::warn!("could not record attempts: {}", write_err);
                }
                Err(err)
            }
        }
    }

    fn hand_over_settings(&mut self, outcome: &StageOutcome, keys: &[&str]) {
        let next = match outcome.kind {
            StageKind::Relaxation => StageKind::Static,
            _ => return,
        };
        for key in keys {
            if let Some(value) = outcome.settings.get(key) {
                log::debug!("handing {} = {} to {}", key, value, next);
                self.registry.set(next, key, value.clone());
            }
        }
    }

    fn write_artifacts(&self, outcome: &StageOutcome) -> Result<PathBuf> {
        let data_file = self
            .run_dir
            .join(format!("{}_data.json", outcome.kind.name()));
        write_json(&data_file, &outcome.data)?;
        self.write_attempts(outcome.kind, &outcome.attempts)?;
        Ok(data_file)
    }

    fn write_attempts(&self, kind: StageKind, attempts: &[AttemptRecord]) -> Result<()> {
        let path = self.run_dir.join(format!("{}_attempts.json", kind.name()));
        write_json(&path, &attempts)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| VaspflowError::JsonError {
        path: path.display().to_string(),
        source: e,
    })?;
    fs::write(path, text).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

fn copy_into(source: &Path, dir: &Path) -> Result<()> {
    let Some(name) = source.file_name() else {
        return Ok(());
    };
    let target = dir.join(name);
    log::debug!("copying {} -> {}", source.display(), target.display());
    fs::copy(source, &target)
        .map(|_| ())
        .map_err(|e| VaspflowError::FileWriteError {
            path: target.display().to_string(),
            source: e,
        })
}
