//! # graze 命令实现
//!
//! 在运行目录中执行计算配方。
//!
//! ## 功能
//! - 读取输入结构、MPI 命令和自定义参数，确认 POTCAR 来源
//! - 组装 VASP 输入生成器、进程调用器和 vasprun 解析器
//! - 运行配方并打印各阶段摘要
//!
//! ## 依赖关系
//! - 使用 `cli/graze.rs` 定义的参数
//! - 使用 `workflow/`, `parsers/`, `models/settings.rs`
//! - 使用 `utils/output.rs`

use crate::cli::graze::GrazeArgs;
use crate::error::{Result, VaspflowError};
use crate::models::SettingsRegistry;
use crate::parsers::{poscar, VasprunParser};
use crate::utils::output;
use crate::workflow::checkpoint::POTENTIAL_FILE;
use crate::workflow::recipe::RecipeReport;
use crate::workflow::stage::Collaborators;
use crate::workflow::{
    ProcessInvoker, RecipeDriver, StageKind, VaspInputGenerator, WorkflowRecipe,
};

use std::fs;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

/// breed 写出的 MPI 命令文件
pub const MPI_CALL_FILE: &str = "mpi_call.txt";

/// breed 复制到运行目录的自定义参数文件
pub const CUSTOM_SETTINGS_FILE: &str = "custom_calculation_settings.json";

/// 阶段摘要行
#[derive(Debug, Clone, Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Converged")]
    converged: String,
    #[tabled(rename = "Attempts")]
    attempts: usize,
    #[tabled(rename = "Final energy (eV)")]
    energy: String,
}

/// 执行 graze 命令，返回配方是否收敛
pub fn execute(args: GrazeArgs) -> Result<bool> {
    output::print_header("Grazing");

    let run = &args.run_location;
    if !run.is_dir() {
        return Err(VaspflowError::DirectoryNotFound {
            path: run.display().to_string(),
        });
    }

    let recipe: WorkflowRecipe = args.workflow.parse()?;
    let mpi_call = resolve_mpi_call(args.mpi_call.as_deref(), run)?;
    let registry = load_settings(args.custom_settings.as_deref(), run)?;
    check_potential_source(args.potcar_dir.as_deref(), run)?;

    let structure_path = resolve_against(run, &args.input_structure);
    let structure = poscar::parse_poscar_file(&structure_path)?;

    output::print_field("Run location", &run.display().to_string());
    output::print_field("Workflow", recipe.name());
    output::print_field("Structure", &format!("{} ({} atoms)", structure.formula(), structure.atoms.len()));
    output::print_field("MPI call", &mpi_call);
    if args.from_scratch {
        output::print_field("Mode", "from scratch");
    }
    println!();

    let generator = VaspInputGenerator::new(args.potcar_dir.clone());
    let invoker = ProcessInvoker::new(mpi_call).with_spinner(!args.no_progress);
    let parser = VasprunParser;
    let collaborators = Collaborators {
        generator: &generator,
        invoker: &invoker,
        parser: &parser,
    };

    let mut driver = RecipeDriver::new(run, collaborators, registry)
        .with_from_scratch(args.from_scratch);
    for kind in StageKind::ALL {
        let limit = if kind.is_relaxation() {
            args.max_relaxation_attempts
        } else {
            args.max_static_attempts
        };
        driver = driver.with_max_attempts(kind, limit);
    }

    let report = driver.run(recipe, structure)?;
    print_report(&report);

    Ok(report.converged)
}

/// MPI 命令：命令行/环境变量优先，其次运行目录中的 mpi_call.txt
pub fn resolve_mpi_call(explicit: Option<&str>, run: &Path) -> Result<String> {
    if let Some(call) = explicit.map(str::trim).filter(|c| !c.is_empty()) {
        return Ok(call.to_string());
    }

    let path = run.join(MPI_CALL_FILE);
    if !path.is_file() {
        return Err(VaspflowError::InvalidArgument(format!(
            "no MPI call given: pass --mpi-call, set VASPFLOW_MPI_CALL or create {}",
            path.display()
        )));
    }
    let text = fs::read_to_string(&path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    let call = text.trim();
    if call.is_empty() {
        return Err(VaspflowError::InvalidArgument(format!(
            "{} is empty",
            path.display()
        )));
    }
    Ok(call.to_string())
}

/// 自定义参数：显式文件优先，其次运行目录中的默认文件
pub fn load_settings(explicit: Option<&Path>, run: &Path) -> Result<SettingsRegistry> {
    match explicit {
        Some(path) => SettingsRegistry::from_json_file(path),
        None => {
            let default = run.join(CUSTOM_SETTINGS_FILE);
            if default.is_file() {
                SettingsRegistry::from_json_file(&default)
            } else {
                Ok(SettingsRegistry::new())
            }
        }
    }
}

/// 需要赝势库或运行目录中的 POTCAR，否则第一次尝试前就失败
pub fn check_potential_source(potcar_dir: Option<&Path>, run: &Path) -> Result<()> {
    match potcar_dir {
        Some(dir) if !dir.is_dir() => Err(VaspflowError::DirectoryNotFound {
            path: dir.display().to_string(),
        }),
        Some(_) => Ok(()),
        None if run.join(POTENTIAL_FILE).is_file() => Ok(()),
        None => Err(VaspflowError::InvalidArgument(format!(
            "no POTCAR source: pass --potcar-dir, set VASPFLOW_POTCAR_DIR or place {} in the run location",
            POTENTIAL_FILE
        ))),
    }
}

fn resolve_against(run: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        run.join(path)
    }
}

fn print_report(report: &RecipeReport) {
    let rows: Vec<StageRow> = report
        .stages
        .iter()
        .map(|s| StageRow {
            stage: s.kind.to_string(),
            converged: if s.converged { "yes" } else { "no" }.to_string(),
            attempts: s.attempts,
            energy: s
                .final_energy
                .map(|e| format!("{:.6}", e))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!();
    println!("{}", Table::new(&rows));

    if report.converged {
        output::print_done(&format!("Workflow '{}' converged", report.recipe));
    } else {
        output::print_warning(&format!(
            "Workflow '{}' stopped: a stage did not converge within its attempt limit",
            report.recipe
        ));
    }
}
