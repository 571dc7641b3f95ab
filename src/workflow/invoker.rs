//! # 求解器调用
//!
//! 在工作目录中启动求解器进程，标准输出和标准错误重定向到
//! `stdout.txt` / `stderr.txt`，阻塞等待进程结束并返回退出码。
//! 没有超时和取消，时间限制由作业调度系统负责。
//!
//! ## 依赖关系
//! - 被 `workflow/stage.rs` 使用
//! - 使用 `utils/progress.rs` 显示运行中的 spinner

use crate::error::{Result, VaspflowError};
use crate::utils::progress;

use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};

/// 控制台输出文件名
pub const STDOUT_FILE: &str = "stdout.txt";
pub const STDERR_FILE: &str = "stderr.txt";

/// 求解器调用接口
pub trait SolverInvoker {
    /// 在 `work_dir` 中运行一次求解器，返回退出码
    fn invoke(&self, work_dir: &Path) -> Result<i32>;

    /// 日志和错误信息中显示的命令
    fn describe(&self) -> String {
        "solver".to_string()
    }

    /// 上一次运行的控制台输出
    fn console_text(&self, work_dir: &Path) -> Result<String> {
        read_console(work_dir)
    }
}

/// 读取 `stdout.txt`；文件不存在视为空输出
pub fn read_console(work_dir: &Path) -> Result<String> {
    let path = work_dir.join(STDOUT_FILE);
    if !path.exists() {
        return Ok(String::new());
    }
    fs::read(&path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| VaspflowError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })
}

/// 以子进程方式运行 MPI 命令
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    command: String,
    show_spinner: bool,
}

impl ProcessInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            show_spinner: false,
        }
    }

    pub fn with_spinner(mut self, show: bool) -> Self {
        self.show_spinner = show;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl SolverInvoker for ProcessInvoker {
    fn describe(&self) -> String {
        self.command.clone()
    }

    fn invoke(&self, work_dir: &Path) -> Result<i32> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VaspflowError::InvalidArgument("empty solver command".to_string()))?;

        let stdout = create_capture(&work_dir.join(STDOUT_FILE))?;
        let stderr = create_capture(&work_dir.join(STDERR_FILE))?;

        log::debug!("running '{}' in {}", self.command, work_dir.display());
        let spinner = self
            .show_spinner
            .then(|| progress::create_spinner(&format!("{} ({})", self.command, work_dir.display())));

        let status = Command::new(program)
            .args(parts)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status();

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        let status = status.map_err(|e| VaspflowError::CommandNotFound {
            command: self.command.clone(),
            source: e,
        })?;

        // 被信号终止时没有退出码
        Ok(status.code().unwrap_or(-1))
    }
}

fn create_capture(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| VaspflowError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}
