//! # breed 命令实现
//!
//! 准备运行目录：复制输入结构和 POTCAR、写出 MPI 命令和自定义参数，
//! 生成运行 `vaspflow graze` 的 sbatch 脚本，可选自动提交。
//!
//! ## 依赖关系
//! - 使用 `cli/breed.rs` 定义的参数
//! - 使用 `utils/slurm.rs`, `utils/output.rs`
//! - 使用 `parsers/poscar.rs` 校验输入结构

use crate::cli::breed::BreedArgs;
use crate::commands::graze::{CUSTOM_SETTINGS_FILE, MPI_CALL_FILE};
use crate::error::{Result, VaspflowError};
use crate::models::SettingsRegistry;
use crate::parsers::poscar;
use crate::utils::output;
use crate::utils::slurm::{generate_sbatch_script, shell_quote, SlurmConfig};
use crate::workflow::checkpoint::{INPUT_GEOMETRY_FILE, POTENTIAL_FILE};
use crate::workflow::WorkflowRecipe;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// 生成的作业脚本文件名
pub const SBATCH_FILE: &str = "vaspflow.sbatch";

/// 执行 breed 命令
pub fn execute(args: BreedArgs) -> Result<()> {
    output::print_header("Breeding Run Location");

    let recipe: WorkflowRecipe = args.workflow.parse()?;
    let script = prepare_run_location(&args, recipe)?;

    if args.submit && !args.dry_run {
        let job = submit(&script, &args.run_location)?;
        output::print_success(&format!("Submitted: {}", job));
    } else {
        output::print_info(&format!("[DRY] Generated job: {}", script.display()));
    }

    Ok(())
}

/// 写出运行目录中的全部文件，返回作业脚本路径
fn prepare_run_location(args: &BreedArgs, recipe: WorkflowRecipe) -> Result<PathBuf> {
    if !args.input_structure.is_file() {
        return Err(VaspflowError::FileNotFound {
            path: args.input_structure.display().to_string(),
        });
    }
    let crystal = poscar::parse_poscar_file(&args.input_structure)?;

    let run = &args.run_location;
    create_dir(run)?;
    create_dir(&run.join("slurm_logs"))?;

    copy_file(&args.input_structure, &run.join(INPUT_GEOMETRY_FILE))?;
    output::print_success(&format!(
        "{} ({} atoms) -> {}",
        crystal.formula(),
        crystal.atoms.len(),
        INPUT_GEOMETRY_FILE
    ));

    write_file(&run.join(MPI_CALL_FILE), &format!("{}\n", args.mpi_call.trim()))?;

    if let Some(potcar) = &args.potcar {
        if !potcar.is_file() {
            return Err(VaspflowError::FileNotFound {
                path: potcar.display().to_string(),
            });
        }
        copy_file(potcar, &run.join(POTENTIAL_FILE))?;
        output::print_success(&format!("{} -> {}", potcar.display(), POTENTIAL_FILE));
    } else if args.potcar_dir.is_none() && !run.join(POTENTIAL_FILE).is_file() {
        output::print_warning("No POTCAR given: graze needs --potcar-dir or a POTCAR in the run location");
    }

    if let Some(custom) = &args.custom_settings {
        // 先校验，避免作业运行时才发现格式错误
        SettingsRegistry::from_json_file(custom)?;
        copy_file(custom, &run.join(CUSTOM_SETTINGS_FILE))?;
        output::print_success(&format!("Custom settings -> {}", CUSTOM_SETTINGS_FILE));
    }

    let job_name = args.job_name.clone().unwrap_or_else(|| default_job_name(run));
    let config = SlurmConfig {
        job_name,
        partition: args.partition.clone(),
        constraint: args.constraint.clone(),
        nodes: args.nodes,
        ntasks: args.ntasks,
        cpus_per_task: args.cpus_per_task,
        mem_per_cpu: args.mem_per_cpu.clone(),
        time_limit: args.time.clone(),
        modules: args
            .modules
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect(),
    };

    let workdir = fs::canonicalize(run).unwrap_or_else(|_| run.clone());
    let mut exec_cmd = format!(
        "vaspflow graze . --workflow {} --no-progress",
        shell_quote(recipe.name())
    );
    if let Some(dir) = &args.potcar_dir {
        let dir = fs::canonicalize(dir).unwrap_or_else(|_| dir.clone());
        exec_cmd.push_str(&format!(" --potcar-dir {}", shell_quote(&dir.display().to_string())));
    }
    let script_path = run.join(SBATCH_FILE);
    write_file(&script_path, &generate_sbatch_script(&config, &workdir, &exec_cmd))?;
    output::print_success(&format!("Batch script -> {}", script_path.display()));

    Ok(script_path)
}

/// 用 sbatch 提交，返回调度器的输出
fn submit(script: &Path, run: &Path) -> Result<String> {
    let script_name = script.file_name().map(PathBuf::from).unwrap_or_else(|| script.to_path_buf());
    let out = Command::new("sbatch")
        .arg(&script_name)
        .current_dir(run)
        .output()
        .map_err(|e| VaspflowError::CommandNotFound {
            command: "sbatch".to_string(),
            source: e,
        })?;

    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        Err(VaspflowError::CommandFailed {
            command: format!("sbatch {}", script_name.display()),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }
}

fn default_job_name(run: &Path) -> String {
    fs::canonicalize(run)
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "vaspflow".to_string())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| VaspflowError::FileWriteError {
            path: to.display().to_string(),
            source: e,
        })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
