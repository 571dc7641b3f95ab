//! # 计算参数数据模型
//!
//! `CalculationSettings` 是 INCAR 指令名到取值的映射，指令名不区分大小写
//! （统一存为小写）。`SettingsRegistry` 保存每个阶段的用户自定义参数，
//! 并承接需要同步到所有阶段的修复（例如 NBANDS）。
//!
//! ## 自定义参数文件格式
//! ```json
//! {"relaxation": {"ediff": 1e-8, "nsw": 80}, "static": {"sigma": 0.1}}
//! ```
//!
//! ## 依赖关系
//! - 被 `workflow/` 各模块使用
//! - 使用 `serde_json` 读取自定义参数

use crate::error::{Result, VaspflowError};
use crate::workflow::defaults;
use crate::workflow::StageKind;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// 单个指令的取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<SettingValue>),
}

impl SettingValue {
    /// 数值（整数或浮点）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i),
            SettingValue::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// INCAR 格式的取值文本
    pub fn to_incar(&self) -> String {
        match self {
            SettingValue::Bool(true) => ".TRUE.".to_string(),
            SettingValue::Bool(false) => ".FALSE.".to_string(),
            SettingValue::Int(i) => i.to_string(),
            SettingValue::Float(x) => format!("{:.3E}", x),
            SettingValue::Text(s) => s.to_uppercase(),
            SettingValue::List(items) => items
                .iter()
                .map(SettingValue::to_incar)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Text(s) => write!(f, "{}", s),
            SettingValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

/// 一组 INCAR 指令
///
/// 键一律小写存储；反序列化和合并同样经过 `set`。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CalculationSettings {
    values: BTreeMap<String, SettingValue>,
}

impl<'de> Deserialize<'de> for CalculationSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = BTreeMap::<String, SettingValue>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

impl CalculationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(&key.to_lowercase())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(SettingValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(SettingValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(SettingValue::as_str)
    }

    /// 设置指令，返回旧值
    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) -> Option<SettingValue> {
        self.values.insert(key.to_lowercase(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(&key.to_lowercase())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&key.to_lowercase())
    }

    /// 用 `other` 覆盖当前参数（浅合并，`other` 优先）
    pub fn merge(&mut self, other: &CalculationSettings) {
        for (key, value) in &other.values {
            self.set(key, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<SettingValue>> FromIterator<(K, V)> for CalculationSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = CalculationSettings::new();
        for (k, v) in iter {
            settings.set(k.as_ref(), v);
        }
        settings
    }
}

/// 阶段名 -> 自定义参数
///
/// 由配方驱动器持有；跨阶段的修复写入这里，而不是全局状态。
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    overrides: BTreeMap<StageKind, CalculationSettings>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文本构建
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self> {
        let raw: BTreeMap<String, CalculationSettings> =
            serde_json::from_str(text).map_err(|e| VaspflowError::JsonError {
                path: origin.to_string(),
                source: e,
            })?;

        let mut registry = SettingsRegistry::new();
        for (stage_name, settings) in raw {
            let kind: StageKind = stage_name.parse().map_err(|_| {
                VaspflowError::InvalidSetting(format!(
                    "unknown stage '{}' in {}",
                    stage_name, origin
                ))
            })?;
            registry.overrides.entry(kind).or_default().merge(&settings);
        }
        Ok(registry)
    }

    /// 从 JSON 文件构建
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(VaspflowError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let text = fs::read_to_string(path).map_err(|e| VaspflowError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    /// 某阶段的自定义参数
    pub fn overrides_for(&self, kind: StageKind) -> CalculationSettings {
        self.overrides.get(&kind).cloned().unwrap_or_default()
    }

    /// 阶段默认参数 + 自定义参数
    pub fn settings_for(&self, kind: StageKind) -> CalculationSettings {
        let mut settings = defaults::default_settings(kind);
        if let Some(custom) = self.overrides.get(&kind) {
            settings.merge(custom);
        }
        settings
    }

    /// 为单个阶段写入参数
    pub fn set(&mut self, kind: StageKind, key: &str, value: SettingValue) {
        self.overrides.entry(kind).or_default().set(key, value);
    }

    /// 把参数写入所有阶段
    pub fn propagate(&mut self, key: &str, value: &SettingValue) {
        for kind in StageKind::ALL {
            self.overrides
                .entry(kind)
                .or_default()
                .set(key, value.clone());
        }
    }
}
