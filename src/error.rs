//! # 统一错误处理模块
//!
//! 定义 vaspflow 的所有错误类型，使用 `thiserror` 派生。
//!
//! 只有致命错误会以 `VaspflowError` 的形式离开工作流状态机；
//! 可修复的数值故障和尝试次数耗尽只记录在 `AttemptRecord` 历史中。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 使用 `models/fault.rs` 中的故障标签

use crate::models::FaultSet;
use thiserror::Error;

/// 错误所属类别，用于给出针对性的处理建议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 求解器进程非零退出
    ProcessFailure,
    /// 需要人工修正输入（INCAR 读取失败、无输出等）
    ConfigurationFault,
    /// 检查点、结构或结果文件缺失/损坏
    IoFault,
    /// 命令行或配置文件用法错误
    UsageError,
}

/// vaspflow 统一错误类型
#[derive(Error, Debug)]
pub enum VaspflowError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    // ─────────────────────────────────────────────────────────────
    // 配置错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid calculation setting: {0}")]
    InvalidSetting(String),

    #[error("Unknown workflow '{0}' (expected one of: relaxation, static, relaxation+static, acc_std_relax, sc_forces)")]
    UnknownWorkflow(String),

    #[error("No POTCAR available for species '{species}' (looked in {path})")]
    MissingPotential { species: String, path: String },

    #[error("No usable geometry in {dir}: neither CONTCAR nor {input} is present")]
    MissingGeometry { dir: String, input: String },

    // ─────────────────────────────────────────────────────────────
    // 求解器错误
    // ─────────────────────────────────────────────────────────────
    #[error("External command '{command}' could not be started")]
    CommandNotFound {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Solver process '{command}' exited with status {code} (stage {stage}, attempt {attempt})")]
    SolverProcessFailed {
        command: String,
        code: i32,
        stage: String,
        attempt: usize,
    },

    #[error("Solver could not run stage {stage} (attempt {attempt}): {faults}")]
    ConfigurationFault {
        stage: String,
        attempt: usize,
        faults: FaultSet,
    },

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("JSON error in {path}: {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

impl VaspflowError {
    /// 错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            VaspflowError::SolverProcessFailed { .. }
            | VaspflowError::CommandNotFound { .. }
            | VaspflowError::CommandFailed { .. } => ErrorCategory::ProcessFailure,
            VaspflowError::ConfigurationFault { .. } | VaspflowError::MissingPotential { .. } => {
                ErrorCategory::ConfigurationFault
            }
            VaspflowError::FileReadError { .. }
            | VaspflowError::FileWriteError { .. }
            | VaspflowError::DirectoryNotFound { .. }
            | VaspflowError::FileNotFound { .. }
            | VaspflowError::ParseError { .. }
            | VaspflowError::MissingGeometry { .. }
            | VaspflowError::JsonError { .. }
            | VaspflowError::CsvError(_) => ErrorCategory::IoFault,
            VaspflowError::InvalidArgument(_)
            | VaspflowError::InvalidSetting(_)
            | VaspflowError::UnknownWorkflow(_) => ErrorCategory::UsageError,
        }
    }

    /// 给操作人员的一行处理建议
    pub fn hint(&self) -> &'static str {
        if let VaspflowError::CommandFailed { .. } = self {
            return "Check that the batch scheduler tools are on PATH and the generated script is valid.";
        }
        match self.category() {
            ErrorCategory::ProcessFailure => {
                "Check the MPI call, the solver executable and stderr.txt in the stage directory."
            }
            ErrorCategory::ConfigurationFault => {
                "The solver rejected its input: inspect INCAR/POTCAR and stdout.txt, fix the settings and rerun."
            }
            ErrorCategory::IoFault => {
                "A checkpoint, structure or result file is missing or corrupt; inspect the run location."
            }
            ErrorCategory::UsageError => "Run with --help to see the accepted options.",
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, VaspflowError>;
