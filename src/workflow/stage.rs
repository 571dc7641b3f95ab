//! # 单阶段状态机
//!
//! 一个阶段的有界重试循环：
//!
//! ```text
//! Init -> Invoking -> Classifying -> { Converged | Remediating | Fatal }
//! Remediating -> Restarting -> Invoking
//! ```
//!
//! - 求解器非零退出：直接 `Fatal`，不做任何修复
//! - 控制台输出含输入错误或为空：直接 `Fatal`
//! - 收敛，或尝试次数达到上限：`Converged`（后者记为未收敛，但不是错误）
//! - 其他情况：计算参数增量，备份输出，从最新结构重启
//!
//! 可修复的故障和次数耗尽只体现在 `AttemptRecord` 历史中，
//! 只有致命错误会以 `VaspflowError` 返回。
//!
//! ## 依赖关系
//! - 被 `workflow/recipe.rs` 使用
//! - 使用 classifier, remediation, convergence, checkpoint, invoker, input

use crate::error::{Result, VaspflowError};
use crate::models::{CalculationData, CalculationSettings, Crystal, FaultSet, SettingsRegistry};
use crate::parsers::OutputParser;
use crate::workflow::checkpoint::{CheckpointManager, CHARGE_DENSITY_FILE};
use crate::workflow::classifier;
use crate::workflow::convergence::ConvergenceEvaluator;
use crate::workflow::input::InputGenerator;
use crate::workflow::invoker::SolverInvoker;
use crate::workflow::remediation::RemediationPolicy;
use crate::workflow::StageKind;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Init,
    Invoking,
    Classifying,
    Remediating,
    Restarting,
    Converged,
    Fatal,
}

/// 一次尝试的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    /// 本次尝试使用的参数
    pub settings: CalculationSettings,
    pub faults: FaultSet,
    pub converged: bool,
}

/// 阶段结果
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub kind: StageKind,
    pub converged: bool,
    pub attempts: Vec<AttemptRecord>,
    /// 最后一次尝试的计算数据
    pub data: CalculationData,
    /// 最后一次尝试使用的参数
    pub settings: CalculationSettings,
    /// 阶段结束时的结构
    pub final_structure: Crystal,
}

/// 外部协作者
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub generator: &'a dyn InputGenerator,
    pub invoker: &'a dyn SolverInvoker,
    pub parser: &'a dyn OutputParser,
}

/// 单阶段状态机
pub struct StageMachine<'a> {
    kind: StageKind,
    work_dir: PathBuf,
    max_attempts: usize,
    settings: CalculationSettings,
    collaborators: Collaborators<'a>,
    policy: RemediationPolicy,
    evaluator: ConvergenceEvaluator,
    checkpoint: CheckpointManager,
    attempts: Vec<AttemptRecord>,
    state: StageState,
}

impl<'a> StageMachine<'a> {
    pub fn new(
        kind: StageKind,
        work_dir: impl Into<PathBuf>,
        settings: CalculationSettings,
        collaborators: Collaborators<'a>,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            kind,
            checkpoint: CheckpointManager::new(&work_dir),
            work_dir,
            max_attempts: kind.default_max_attempts(),
            settings,
            collaborators,
            policy: RemediationPolicy::default(),
            evaluator: ConvergenceEvaluator::new(kind),
            attempts: Vec::new(),
            state: StageState::Init,
        }
    }

    /// 最大尝试次数（至少为 1）
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    /// 至今为止的尝试记录（致命错误后同样可用）
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn settings(&self) -> &CalculationSettings {
        &self.settings
    }

    /// 运行阶段直到终止状态
    ///
    /// 需要同步到所有阶段的修复（NBANDS）写入 `registry`。
    pub fn run(&mut self, initial: Crystal, registry: &mut SettingsRegistry) -> Result<StageOutcome> {
        let mut crystal = initial;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.transition(StageState::Invoking, attempt);

            self.collaborators
                .generator
                .write_inputs(&crystal, &self.settings, &self.work_dir)?;
            let code = self.collaborators.invoker.invoke(&self.work_dir)?;
            if code != 0 {
                self.transition(StageState::Fatal, attempt);
                return Err(VaspflowError::SolverProcessFailed {
                    command: self.collaborators.invoker.describe(),
                    code,
                    stage: self.kind.name().to_string(),
                    attempt,
                });
            }

            self.transition(StageState::Classifying, attempt);
            let console = self.collaborators.invoker.console_text(&self.work_dir)?;
            let mut faults = classifier::classify(&console);

            if faults.has_fatal() {
                self.record(attempt, faults.clone(), false);
                self.transition(StageState::Fatal, attempt);
                return Err(VaspflowError::ConfigurationFault {
                    stage: self.kind.name().to_string(),
                    attempt,
                    faults: faults.fatal(),
                });
            }

            let data = self.collaborators.parser.parse(&self.work_dir)?;
            if let Some(tag) = classifier::band_count_fault(&data) {
                faults.insert(tag);
            }

            let verdict = self.evaluator.evaluate(&self.settings, &data);
            log::info!(
                "{} attempt {}/{}: faults [{}], energy converged {}, forces converged {}",
                self.kind,
                attempt,
                self.max_attempts,
                faults,
                verdict.energy,
                verdict
                    .forces
                    .map_or_else(|| "n/a".to_string(), |f| f.to_string()),
            );
            self.record(attempt, faults.clone(), verdict.converged());

            if verdict.converged() || attempt >= self.max_attempts {
                self.transition(StageState::Converged, attempt);
                if !verdict.converged() {
                    log::warn!(
                        "{} not converged after {} attempts",
                        self.kind,
                        attempt
                    );
                }
                return self.finish(crystal, data, verdict.converged());
            }

            self.transition(StageState::Remediating, attempt);
            let delta = self
                .policy
                .remediate(&faults, &self.settings, Some(&data))
                .map_err(|fatal| VaspflowError::ConfigurationFault {
                    stage: self.kind.name().to_string(),
                    attempt,
                    faults: fatal,
                })?;
            for (key, value) in delta.changes.iter() {
                log::debug!("{}: {} = {}", self.kind, key, value);
            }
            delta.apply_to(&mut self.settings);
            for (key, value) in delta.shared.iter() {
                registry.propagate(key, value);
            }

            self.transition(StageState::Restarting, attempt);
            // 备份会移走 CONTCAR，必须先确定重启结构
            if self.kind.is_relaxation() {
                crystal = self.checkpoint.resolve_restart_structure(self.kind)?;
            }
            self.checkpoint.backup()?;
            if !self.kind.is_relaxation() {
                self.restore_charge_density()?;
            }
        }
    }

    fn finish(&self, crystal: Crystal, data: CalculationData, converged: bool) -> Result<StageOutcome> {
        let final_structure = if self.kind.is_relaxation() {
            self.checkpoint.relaxed_structure()?.unwrap_or(crystal)
        } else {
            crystal
        };

        Ok(StageOutcome {
            kind: self.kind,
            converged,
            attempts: self.attempts.clone(),
            data,
            settings: self.settings.clone(),
            final_structure,
        })
    }

    /// 单点重试从交接来的电荷密度开始，而不是上一次发散的结果
    fn restore_charge_density(&self) -> Result<()> {
        if self.checkpoint.restore_handed_density()? {
            log::info!("{}: restored handed-over CHGCAR for the retry", self.kind);
        } else if self.settings.get_i64("icharg") == Some(1)
            && self.work_dir.join(CHARGE_DENSITY_FILE).is_file()
        {
            log::warn!(
                "{}: retry reads the CHGCAR written by the previous attempt",
                self.kind
            );
        }
        Ok(())
    }

    fn record(&mut self, attempt: usize, faults: FaultSet, converged: bool) {
        self.attempts.push(AttemptRecord {
            attempt,
            settings: self.settings.clone(),
            faults,
            converged,
        });
    }

    fn transition(&mut self, next: StageState, attempt: usize) {
        log::debug!(
            "{} attempt {}: {:?} -> {:?}",
            self.kind,
            attempt,
            self.state,
            next
        );
        self.state = next;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Atom, FaultTag, KpointBands, Lattice, SettingValue};
    use crate::parsers::poscar;
    use crate::workflow::checkpoint::{HANDED_DENSITY_FILE, INPUT_GEOMETRY_FILE};
    use crate::workflow::input::VaspInputGenerator;
    use crate::workflow::invoker::STDOUT_FILE;

    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use std::fs;

    /// 记录每次写入的参数
    #[derive(Default)]
    pub(crate) struct RecordingGenerator {
        pub written: RefCell<Vec<CalculationSettings>>,
    }

    impl InputGenerator for RecordingGenerator {
        fn write_inputs(
            &self,
            crystal: &Crystal,
            settings: &CalculationSettings,
            dir: &Path,
        ) -> Result<()> {
            self.written.borrow_mut().push(settings.clone());
            poscar::write_poscar_file(crystal, &dir.join("POSCAR"))
        }
    }

    /// 按脚本返回退出码并写出控制台输出
    pub(crate) struct ScriptedInvoker {
        script: RefCell<VecDeque<(i32, String)>>,
        pub calls: RefCell<usize>,
    }

    impl ScriptedInvoker {
        pub fn new(script: &[(i32, &str)]) -> Self {
            Self {
                script: RefCell::new(script.iter().map(|(c, s)| (*c, s.to_string())).collect()),
                calls: RefCell::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            *self.calls.borrow()
        }
    }

    impl SolverInvoker for ScriptedInvoker {
        fn invoke(&self, work_dir: &Path) -> Result<i32> {
            *self.calls.borrow_mut() += 1;
            let (code, console) = self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or((0, " DAV:   1\n".to_string()));
            fs::write(work_dir.join(STDOUT_FILE), console).unwrap();
            fs::write(work_dir.join("OUTCAR"), "OUTCAR").unwrap();
            Ok(code)
        }
    }

    /// 按脚本返回计算数据；用完后重复最后一个
    pub(crate) struct ScriptedParser {
        script: RefCell<VecDeque<CalculationData>>,
        pub calls: RefCell<usize>,
    }

    impl ScriptedParser {
        pub fn new(script: Vec<CalculationData>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl OutputParser for ScriptedParser {
        fn parse(&self, _work_dir: &Path) -> Result<CalculationData> {
            *self.calls.borrow_mut() += 1;
            let mut script = self.script.borrow_mut();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap_or_default())
            }
        }
    }

    pub(crate) fn si() -> Crystal {
        Crystal::new(
            "Si",
            Lattice::from_vectors([[5.43, 0.0, 0.0], [0.0, 5.43, 0.0], [0.0, 0.0, 5.43]]),
            vec![Atom::new("Si", [0.0, 0.0, 0.0]), Atom::new("Si", [0.25, 0.25, 0.25])],
        )
    }

    /// 单离子步、自洽能量差为 `de` 的计算数据
    pub(crate) fn scf_data(de: f64) -> CalculationData {
        let mut data = CalculationData::default();
        data.scf_energies = vec![vec![-10.0, -10.8, -10.8 - de]];
        data.free_energies = vec![Some(-10.8 - de)];
        data.forces = vec![vec![[0.0; 3], [0.0; 3]]];
        data.n_bands = Some(10);
        data
    }

    fn collaborators<'a>(
        generator: &'a RecordingGenerator,
        invoker: &'a ScriptedInvoker,
        parser: &'a ScriptedParser,
    ) -> Collaborators<'a> {
        Collaborators {
            generator,
            invoker,
            parser,
        }
    }

    fn backups(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("attempt_"))
            .count()
    }

    #[test]
    fn test_static_mixing_fault_then_converged() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[
            (0, " DAV: 1\n WARNING: Sub-Space-Matrix is not hermitian in DAV\n"),
            (0, " DAV: 1\n"),
        ]);
        let parser = ScriptedParser::new(vec![scf_data(1e-2), scf_data(1e-8)]);

        let settings: CalculationSettings = [("ediff", 1e-6)].into_iter().collect();
        let mut registry = SettingsRegistry::new();
        let mut machine = StageMachine::new(
            StageKind::Static,
            dir.path(),
            settings,
            collaborators(&generator, &invoker, &parser),
        )
        .with_max_attempts(2);

        let outcome = machine.run(si(), &mut registry).unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].faults.contains(FaultTag::HermitianDav));
        assert!(!outcome.attempts[0].converged);
        assert_eq!(outcome.attempts[1].settings.get_str("algo"), Some("fast"));
        assert_eq!(generator.written.borrow()[1].get_str("algo"), Some("fast"));
        assert_eq!(machine.state(), StageState::Converged);
        assert_eq!(backups(dir.path()), 1);
    }

    #[test]
    fn test_never_exceeds_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        poscar::write_poscar_file(&si(), &dir.path().join(INPUT_GEOMETRY_FILE)).unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[]);
        let parser = ScriptedParser::new(vec![scf_data(1.0)]);

        let mut registry = SettingsRegistry::new();
        let mut machine = StageMachine::new(
            StageKind::Relaxation,
            dir.path(),
            registry.settings_for(StageKind::Relaxation),
            collaborators(&generator, &invoker, &parser),
        )
        .with_max_attempts(3);

        let outcome = machine.run(si(), &mut registry).unwrap();

        assert!(!outcome.converged);
        assert_eq!(invoker.calls(), 3);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(backups(dir.path()), 2);
    }

    #[test]
    fn test_process_failure_is_fatal_without_remediation() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[(137, " killed\n")]);
        let parser = ScriptedParser::new(vec![scf_data(1.0)]);

        let mut registry = SettingsRegistry::new();
        let mut machine = StageMachine::new(
            StageKind::Relaxation,
            dir.path(),
            CalculationSettings::new(),
            collaborators(&generator, &invoker, &parser),
        );

        let err = machine.run(si(), &mut registry).unwrap_err();

        assert!(matches!(err, VaspflowError::SolverProcessFailed { code: 137, attempt: 1, .. }));
        assert_eq!(invoker.calls(), 1);
        assert_eq!(*parser.calls.borrow(), 0);
        assert!(machine.attempts().is_empty());
        assert_eq!(backups(dir.path()), 0);
        assert_eq!(machine.state(), StageState::Fatal);
    }

    #[test]
    fn test_input_error_is_fatal_on_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[(0, " Error reading item 'ENCUT' from file INCAR.\n")]);
        let parser = ScriptedParser::new(vec![scf_data(1.0)]);

        let mut registry = SettingsRegistry::new();
        let mut machine = StageMachine::new(
            StageKind::Relaxation,
            dir.path(),
            CalculationSettings::new(),
            collaborators(&generator, &invoker, &parser),
        );

        let err = machine.run(si(), &mut registry).unwrap_err();

        match err {
            VaspflowError::ConfigurationFault { faults, attempt, .. } => {
                assert_eq!(attempt, 1);
                assert_eq!(faults, [FaultTag::InputDirectiveError].into_iter().collect::<FaultSet>());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(invoker.calls(), 1);
        assert_eq!(*parser.calls.borrow(), 0);
        assert_eq!(machine.attempts().len(), 1);
        assert_eq!(machine.settings(), &CalculationSettings::new());
    }

    #[test]
    fn test_empty_output_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[(0, "")]);
        let parser = ScriptedParser::new(vec![scf_data(1e-9)]);

        let mut registry = SettingsRegistry::new();
        let err = StageMachine::new(
            StageKind::Static,
            dir.path(),
            CalculationSettings::new(),
            collaborators(&generator, &invoker, &parser),
        )
        .run(si(), &mut registry)
        .unwrap_err();

        assert!(matches!(err, VaspflowError::ConfigurationFault { .. }));
    }

    /// 最高能带占据数为 0.4 的计算数据
    fn crowded_bands(de: f64) -> CalculationData {
        let mut data = scf_data(de);
        let mut kpoints = BTreeMap::new();
        kpoints.insert(
            1,
            KpointBands {
                band_energies: vec![-5.0, 1.0],
                occupations: vec![1.0, 0.4],
            },
        );
        data.band_occupations.insert("spin_1".to_string(), kpoints);
        data
    }

    #[test]
    fn test_band_check_does_not_block_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[]);
        let parser = ScriptedParser::new(vec![crowded_bands(1e-8)]);

        let mut registry = SettingsRegistry::new();
        let outcome = StageMachine::new(
            StageKind::Static,
            dir.path(),
            [("ediff", 1e-6)].into_iter().collect(),
            collaborators(&generator, &invoker, &parser),
        )
        .run(si(), &mut registry)
        .unwrap();

        assert!(outcome.converged);
        assert!(outcome.attempts[0]
            .faults
            .contains(FaultTag::InsufficientElectronicBands));
        assert_eq!(registry.settings_for(StageKind::Relaxation).get("nbands"), None);
    }

    #[test]
    fn test_band_fix_propagates_to_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[]);
        let parser = ScriptedParser::new(vec![crowded_bands(1.0), scf_data(1e-8)]);

        let mut registry = SettingsRegistry::new();
        let outcome = StageMachine::new(
            StageKind::Static,
            dir.path(),
            [("ediff", 1e-6)].into_iter().collect(),
            collaborators(&generator, &invoker, &parser),
        )
        .run(si(), &mut registry)
        .unwrap();

        assert!(outcome.converged);
        assert_eq!(outcome.attempts[1].settings.get_i64("nbands"), Some(14));
        for kind in StageKind::ALL {
            assert_eq!(
                registry.settings_for(kind).get("nbands"),
                Some(&SettingValue::Int(14))
            );
        }
    }

    #[test]
    fn test_relaxation_restarts_from_contcar() {
        let dir = tempfile::tempdir().unwrap();
        poscar::write_poscar_file(&si(), &dir.path().join(INPUT_GEOMETRY_FILE)).unwrap();
        let mut relaxed = si();
        relaxed.lattice = Lattice::from_vectors([[5.5, 0.0, 0.0], [0.0, 5.5, 0.0], [0.0, 0.0, 5.5]]);
        poscar::write_poscar_file(&relaxed, &dir.path().join("CONTCAR")).unwrap();

        let generator = RecordingGenerator::default();
        let invoker = ScriptedInvoker::new(&[(0, " ZBRENT: fatal error in bracketing\n")]);
        let parser = ScriptedParser::new(vec![scf_data(1.0), scf_data(1e-9)]);

        let settings: CalculationSettings =
            [("ediff", 1e-6), ("ediffg", -0.01)].into_iter().collect();
        let mut registry = SettingsRegistry::new();
        let outcome = StageMachine::new(
            StageKind::Relaxation,
            dir.path(),
            settings,
            collaborators(&generator, &invoker, &parser),
        )
        .run(si(), &mut registry)
        .unwrap();

        assert!(outcome.converged);
        // 裸重试：参数不变
        assert_eq!(outcome.attempts[0].settings, outcome.attempts[1].settings);
        let poscar = poscar::parse_poscar_file(&dir.path().join("POSCAR")).unwrap();
        assert!((poscar.lattice.matrix[0][0] - 5.5).abs() < 1e-8);
    }

    #[test]
    fn test_existing_potcar_survives_retries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("POTCAR"), "PAW_PBE Si 05Jan2001\n").unwrap();

        let generator = VaspInputGenerator::new(None);
        let invoker = ScriptedInvoker::new(&[]);
        let parser = ScriptedParser::new(vec![scf_data(1.0), scf_data(1e-9)]);

        let mut registry = SettingsRegistry::new();
        let outcome = StageMachine::new(
            StageKind::Static,
            dir.path(),
            [("ediff", 1e-6)].into_iter().collect(),
            Collaborators {
                generator: &generator,
                invoker: &invoker,
                parser: &parser,
            },
        )
        .with_max_attempts(2)
        .run(si(), &mut registry)
        .unwrap();

        assert!(outcome.converged);
        assert_eq!(invoker.calls(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("POTCAR")).unwrap(),
            "PAW_PBE Si 05Jan2001\n"
        );
        assert_eq!(backups(dir.path()), 1);
    }

    /// 每次运行都覆盖 CHGCAR，模拟求解器写出新的电荷密度
    struct DensityWritingInvoker {
        inner: ScriptedInvoker,
        seen: RefCell<Vec<String>>,
    }

    impl SolverInvoker for DensityWritingInvoker {
        fn invoke(&self, work_dir: &Path) -> Result<i32> {
            let chgcar = work_dir.join("CHGCAR");
            self.seen
                .borrow_mut()
                .push(fs::read_to_string(&chgcar).unwrap_or_default());
            fs::write(&chgcar, "diverged density").unwrap();
            self.inner.invoke(work_dir)
        }
    }

    #[test]
    fn test_static_retry_restores_handed_density() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("CHGCAR"), "relaxed density").unwrap();
        fs::write(dir.path().join(HANDED_DENSITY_FILE), "relaxed density").unwrap();

        let generator = RecordingGenerator::default();
        let invoker = DensityWritingInvoker {
            inner: ScriptedInvoker::new(&[]),
            seen: RefCell::new(Vec::new()),
        };
        let parser = ScriptedParser::new(vec![scf_data(1.0), scf_data(1e-9)]);

        let mut registry = SettingsRegistry::new();
        let outcome = StageMachine::new(
            StageKind::Static,
            dir.path(),
            [("ediff", 1e-6), ("icharg", 1.0)].into_iter().collect(),
            Collaborators {
                generator: &generator,
                invoker: &invoker,
                parser: &parser,
            },
        )
        .with_max_attempts(2)
        .run(si(), &mut registry)
        .unwrap();

        assert!(outcome.converged);
        assert_eq!(
            *invoker.seen.borrow(),
            ["relaxed density", "relaxed density"]
        );
    }
}
