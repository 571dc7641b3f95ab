//! # 文件收集器
//!
//! 根据根目录和文件名模式收集待处理文件列表。
//!
//! ## 功能
//! - 支持单文件和目录输入
//! - glob 模式匹配（逗号分隔的多模式）
//! - 可限制递归深度
//!
//! ## 依赖关系
//! - 被 `commands/herd.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{Result, VaspflowError};

use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 文件收集器
pub struct FileCollector {
    /// 输入路径
    input: PathBuf,
    /// 匹配模式列表
    patterns: Vec<Pattern>,
    /// 是否递归
    recursive: bool,
}

impl FileCollector {
    /// 创建新的文件收集器（默认匹配所有文件、递归）
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            patterns: Vec::new(),
            recursive: true,
        }
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.patterns = pattern
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Pattern::new(s).map_err(|e| {
                    VaspflowError::InvalidArgument(format!("Invalid pattern '{}': {}", s, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// 设置是否递归搜索
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 收集所有匹配的文件（排序后返回）
    pub fn collect(&self) -> Vec<PathBuf> {
        if self.input.is_file() {
            return vec![self.input.clone()];
        }

        if !self.input.is_dir() {
            return vec![];
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|entry| self.matches_patterns(entry.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();
        files
    }

    /// 检查文件是否匹配任一模式
    fn matches_patterns(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        self.patterns.iter().any(|p| p.matches(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collects_stage_artifacts_recursively() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("NaCl").join("run1");
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join("relaxation_data.json"), "{}").unwrap();
        fs::write(run.join("relaxation_attempts.json"), "[]").unwrap();
        fs::write(root.path().join("static_data.json"), "{}").unwrap();

        let files = FileCollector::new(root.path())
            .with_pattern("*_data.json")
            .unwrap()
            .collect();
        assert_eq!(files.len(), 2);

        let shallow = FileCollector::new(root.path())
            .with_pattern("*_data.json")
            .unwrap()
            .recursive(false)
            .collect();
        assert_eq!(shallow.len(), 1);
    }

    #[test]
    fn test_multiple_patterns() {
        let root = tempfile::tempdir().unwrap();
        for name in ["static_data.json", "POSCAR", "OUTCAR"] {
            fs::write(root.path().join(name), "").unwrap();
        }
        let files = FileCollector::new(root.path())
            .with_pattern("*.json, POS*")
            .unwrap()
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(FileCollector::new(".").with_pattern("[").is_err());
    }
}
