//! # herd 命令实现
//!
//! 汇总运行目录中 graze 写出的阶段结果。
//!
//! ## 功能
//! - 递归搜索 `<stage>_data.json`
//! - 并行加载计算数据和同目录的 `<stage>_attempts.json`
//! - 从阶段目录的 vasprun.xml 或 DOSCAR 读取总态密度，给出带隙和金属判断
//! - 生成终端表格和可选 CSV 输出
//!
//! ## 依赖关系
//! - 使用 `cli/herd.rs` 定义的参数
//! - 使用 `batch/` 收集和并行加载
//! - 使用 `models/calculation.rs`, `workflow/stage.rs`
//! - 使用 `parsers/dos.rs`

use crate::batch::{BatchRunner, FileCollector, ProcessResult};
use crate::cli::herd::HerdArgs;
use crate::error::{Result, VaspflowError};
use crate::models::dos::DEFAULT_DOS_TOLERANCE;
use crate::models::{CalculationData, DensityOfStates};
use crate::parsers::dos;
use crate::utils::output;
use crate::workflow::AttemptRecord;

use std::fs;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

const DATA_SUFFIX: &str = "_data.json";
const ATTEMPTS_SUFFIX: &str = "_attempts.json";

/// 一个阶段结果文件的摘要
#[derive(Debug, Clone)]
struct StageRecord {
    run: String,
    stage: String,
    data: CalculationData,
    /// 尝试历史缺失时为 None
    attempts: Option<Vec<AttemptRecord>>,
    /// 阶段目录中没有态密度时为 None
    dos: Option<DensityOfStates>,
}

impl StageRecord {
    fn converged(&self) -> Option<bool> {
        self.attempts
            .as_ref()
            .and_then(|a| a.last())
            .map(|a| a.converged)
    }

    fn is_metal(&self) -> Option<bool> {
        self.dos.as_ref().map(|d| d.is_metal(DEFAULT_DOS_TOLERANCE))
    }

    fn band_gap(&self) -> Option<f64> {
        self.dos
            .as_ref()
            .and_then(|d| d.calculate_band_gap(DEFAULT_DOS_TOLERANCE))
    }
}

/// 表格行
#[derive(Debug, Clone, Tabled)]
struct HerdRow {
    #[tabled(rename = "Run")]
    run: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Formula")]
    formula: String,
    #[tabled(rename = "Atoms")]
    atoms: usize,
    #[tabled(rename = "Energy (eV)")]
    energy: String,
    #[tabled(rename = "E/atom (eV)")]
    energy_per_atom: String,
    #[tabled(rename = "E_F (eV)")]
    fermi: String,
    #[tabled(rename = "Gap (eV)")]
    band_gap: String,
    #[tabled(rename = "Metal")]
    metal: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Converged")]
    converged: String,
    #[tabled(rename = "Runtime (s)")]
    runtime: String,
}

/// 执行 herd 命令
pub fn execute(args: HerdArgs) -> Result<()> {
    output::print_header("Herding Results");

    if !args.root.is_dir() {
        return Err(VaspflowError::DirectoryNotFound {
            path: args.root.display().to_string(),
        });
    }

    let files = FileCollector::new(args.root.clone())
        .with_pattern(&args.pattern)?
        .recursive(!args.no_recursive)
        .collect();

    if files.is_empty() {
        output::print_warning(&format!(
            "No files matching '{}' under '{}'",
            args.pattern,
            args.root.display()
        ));
        return Ok(());
    }
    output::print_info(&format!("Found {} result files", files.len()));

    let runner = BatchRunner::new(args.jobs).with_progress(files.len() > 1);
    log::debug!("loading results with {} threads", runner.jobs());
    let result = runner.run(files, |path| match load_record(path) {
        Ok(record) => ProcessResult::Success(record),
        Err(e) => ProcessResult::Failed(path.display().to_string(), e.to_string()),
    })?;

    for (path, err) in &result.failures {
        output::print_warning(&format!("Skipped {}: {}", path, err));
    }

    let mut records = result.items;
    records.sort_by(|a, b| (&a.run, &a.stage).cmp(&(&b.run, &b.stage)));

    let rows: Vec<HerdRow> = records.iter().map(to_row).collect();
    println!();
    println!("{}", Table::new(&rows));

    if let Some(csv_path) = &args.csv {
        save_csv(&records, csv_path)?;
        output::print_success(&format!("CSV written to '{}'", csv_path.display()));
    }

    let converged = records.iter().filter(|r| r.converged() == Some(true)).count();
    output::print_done(&format!(
        "{} stage results, {} converged, {} unreadable",
        records.len(),
        converged,
        result.failures.len()
    ));

    Ok(())
}

/// 读取一个 `<stage>_data.json` 及其尝试历史
fn load_record(path: &Path) -> Result<StageRecord> {
    let data: CalculationData = read_json(path)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stage = file_name
        .strip_suffix(DATA_SUFFIX)
        .unwrap_or(&file_name)
        .to_string();

    let attempts_path = sibling(path, &format!("{}{}", stage, ATTEMPTS_SUFFIX));
    let attempts = if attempts_path.is_file() {
        Some(read_json::<Vec<AttemptRecord>>(&attempts_path)?)
    } else {
        None
    };

    let dos = stage_dos(path, &stage);

    Ok(StageRecord {
        run: run_name(path),
        stage,
        data,
        attempts,
        dos,
    })
}

/// 阶段子目录优先，其次结果文件所在目录；读取失败只记录警告
fn stage_dos(path: &Path, stage: &str) -> Option<DensityOfStates> {
    let subdir = sibling(path, stage);
    let dir = if subdir.is_dir() {
        subdir
    } else {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    match dos::read_dos(&dir) {
        Ok(dos) => dos,
        Err(e) => {
            log::warn!("no DOS for {}: {}", path.display(), e);
            None
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| VaspflowError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| VaspflowError::JsonError {
        path: path.display().to_string(),
        source: e,
    })
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.parent()
        .map(|p| p.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// 运行目录名
fn run_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| fs::canonicalize(p).ok())
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string())
}

fn formula(data: &CalculationData) -> String {
    data.composition
        .iter()
        .map(|(el, n)| if *n == 1 { el.clone() } else { format!("{}{}", el, n) })
        .collect()
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn fmt_flag(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
    .to_string()
}

fn to_row(record: &StageRecord) -> HerdRow {
    let data = &record.data;
    HerdRow {
        run: record.run.clone(),
        stage: record.stage.clone(),
        formula: formula(data),
        atoms: data.atoms.len(),
        energy: fmt_opt(data.final_energy(), 6),
        energy_per_atom: fmt_opt(data.energy_per_atom(), 6),
        fermi: fmt_opt(data.fermi_energy, 4),
        band_gap: fmt_opt(record.band_gap(), 4),
        metal: fmt_flag(record.is_metal()),
        attempts: record
            .attempts
            .as_ref()
            .map(|a| a.len().to_string())
            .unwrap_or_else(|| "-".to_string()),
        converged: fmt_flag(record.converged()),
        runtime: format!("{:.1}", data.total_runtime()),
    }
}

/// 保存结果到 CSV
fn save_csv(records: &[StageRecord], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "run",
        "stage",
        "formula",
        "n_atoms",
        "energy_eV",
        "energy_per_atom_eV",
        "fermi_energy_eV",
        "band_gap_eV",
        "is_metal",
        "attempts",
        "converged",
        "runtime_s",
    ])?;

    for r in records {
        let data = &r.data;
        wtr.write_record([
            r.run.clone(),
            r.stage.clone(),
            formula(data),
            data.atoms.len().to_string(),
            data.final_energy().map(|e| format!("{:.10}", e)).unwrap_or_default(),
            data.energy_per_atom().map(|e| format!("{:.10}", e)).unwrap_or_default(),
            data.fermi_energy.map(|e| format!("{:.6}", e)).unwrap_or_default(),
            r.band_gap().map(|g| format!("{:.6}", g)).unwrap_or_default(),
            r.is_metal().map(|m| m.to_string()).unwrap_or_default(),
            r.attempts.as_ref().map(|a| a.len().to_string()).unwrap_or_default(),
            r.converged().map(|c| c.to_string()).unwrap_or_default(),
            format!("{:.3}", data.total_runtime()),
        ])?;
    }

    wtr.flush().map_err(|e| VaspflowError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CalculationSettings, FaultSet};
    use std::collections::BTreeMap;

    /// 费米能 1.0 eV，相对费米能的带边为 -2.5 和 2.5 eV
    const DOSCAR: &str = "    2    2    1    0
  0.1E+02  0.1E-09  0.1E-09  0.1E-09  0.5E-15
  1.0E-004
  CAR
 NaCl
      5.00000000     -5.00000000      5      1.00000000      1.00000000
    -4.000  2.000  2.000
    -1.500  1.000  3.000
     1.000  0.000  3.000
     3.500  1.000  4.000
     6.000  1.000  5.000
";

    fn nacl_data() -> CalculationData {
        CalculationData {
            composition: BTreeMap::from([("Cl".to_string(), 1), ("Na".to_string(), 1)]),
            atoms: vec!["Na".to_string(), "Cl".to_string()],
            n_ionic_steps: 1,
            free_energies: vec![Some(-6.5)],
            fermi_energy: Some(1.25),
            scf_looptimes: vec![vec![1.5, 2.5]],
            ..CalculationData::default()
        }
    }

    fn write_run(dir: &Path, with_attempts: bool) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("static_data.json"),
            serde_json::to_string(&nacl_data()).unwrap(),
        )
        .unwrap();
        if with_attempts {
            let attempts = vec![
                AttemptRecord {
                    attempt: 1,
                    settings: CalculationSettings::new(),
                    faults: FaultSet::new(),
                    converged: false,
                },
                AttemptRecord {
                    attempt: 2,
                    settings: CalculationSettings::new(),
                    faults: FaultSet::new(),
                    converged: true,
                },
            ];
            fs::write(
                dir.join("static_attempts.json"),
                serde_json::to_string(&attempts).unwrap(),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_load_record_with_attempts() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl");
        write_run(&run, true);

        let record = load_record(&run.join("static_data.json")).unwrap();
        assert_eq!(record.run, "NaCl");
        assert_eq!(record.stage, "static");
        assert_eq!(record.converged(), Some(true));

        let row = to_row(&record);
        assert_eq!(row.formula, "ClNa");
        assert_eq!(row.energy, "-6.500000");
        assert_eq!(row.energy_per_atom, "-3.250000");
        assert_eq!(row.attempts, "2");
        assert_eq!(row.runtime, "4.0");
    }

    #[test]
    fn test_load_record_without_attempts() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl");
        write_run(&run, false);

        let record = load_record(&run.join("static_data.json")).unwrap();
        assert!(record.attempts.is_none());
        assert!(record.dos.is_none());
        let row = to_row(&record);
        assert_eq!(row.converged, "-");
        assert_eq!(row.band_gap, "-");
        assert_eq!(row.metal, "-");
    }

    #[test]
    fn test_band_gap_from_stage_doscar() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl");
        write_run(&run, true);
        fs::create_dir_all(run.join("static")).unwrap();
        fs::write(run.join("static").join(dos::DOSCAR_FILE), DOSCAR).unwrap();

        let record = load_record(&run.join("static_data.json")).unwrap();
        assert_eq!(record.is_metal(), Some(false));
        assert_eq!(record.band_gap(), Some(5.0));

        let row = to_row(&record);
        assert_eq!(row.band_gap, "5.0000");
        assert_eq!(row.metal, "no");
    }

    #[test]
    fn test_broken_doscar_leaves_record_readable() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl");
        write_run(&run, false);
        fs::write(run.join(dos::DOSCAR_FILE), "truncated\n").unwrap();

        let record = load_record(&run.join("static_data.json")).unwrap();
        assert!(record.dos.is_none());
    }

    #[test]
    fn test_csv_export() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl");
        write_run(&run, true);
        let record = load_record(&run.join("static_data.json")).unwrap();

        let csv_path = root.path().join("summary.csv");
        save_csv(&[record], &csv_path).unwrap();

        let text = fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("run,stage,formula"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("NaCl,static,ClNa,2,-6.5000000000"));
        assert!(row.ends_with(",2,true,4.000"));
        assert!(row.contains(",1.250000,,,"));
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("relaxation_data.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_record(&path),
            Err(VaspflowError::JsonError { .. })
        ));
    }
}
