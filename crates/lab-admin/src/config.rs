//! 配置管理
//!
//! 从配置文件和 `LAB_` 前缀的环境变量加载系统配置，并提供验证、按路径读写和保存功能

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use lab_core::AnalyteStats;
use lab_workflow::{InMemoryReferenceStats, QualityGateConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<LabConfig>>,
    /// 配置文件路径
    config_path: Option<String>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 实验室系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabConfig {
    /// 日志配置
    pub logging: LoggingConfig,
    /// 验收质量关卡
    pub quality_gate: QualityGateConfig,
    /// 质控提醒
    pub scheduler: SchedulerConfig,
    /// 存储配置
    pub store: StoreConfig,
    /// 测试定义 -> 分析物 -> 均值/标准差
    pub reference_stats: ReferenceStats,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或过滤指令，例如 "info" 或 "lab_workflow=debug,info"
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
    /// 是否输出模块路径
    pub with_target: bool,
}

/// 日志格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// 存储后端，目前只支持 "memory"
    pub backend: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            with_target: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
        }
    }
}

impl LabConfig {
    /// 由配置的参考统计构建内存统计来源
    pub fn reference_stats_source(&self) -> InMemoryReferenceStats {
        InMemoryReferenceStats::with_stats(self.reference_stats.clone())
    }
}

/// 测试定义 -> 分析物 -> 均值/标准差
pub type ReferenceStats = HashMap<String, HashMap<String, AnalyteStats>>;

/// 经 config 加载的配置段
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigSections {
    logging: LoggingConfig,
    quality_gate: QualityGateConfig,
    scheduler: SchedulerConfig,
    store: StoreConfig,
}

/// 配置文件中的参考统计表
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReferenceStatsTable {
    reference_stats: ReferenceStats,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    /// 验证规则
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    /// 字段路径
    field_path: &'static str,
    /// 验证函数
    validator: fn(&LabConfig) -> Result<()>,
}

impl ConfigManager {
    /// 创建新的配置管理器，未指定文件时只使用默认值和环境变量
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path)
    }

    /// 使用已有配置创建管理器
    pub fn with_config(config: LabConfig, config_path: Option<&str>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.map(str::to_string),
            validator,
        })
    }

    /// 加载配置：默认值 < 配置文件 < 环境变量
    ///
    /// 环境变量形如 `LAB_SCHEDULER__LOOKAHEAD_HOURS=48`。
    /// `reference_stats` 直接从 TOML 文件解析，保留测试定义和分析物名称的大小写，
    /// 不接受环境变量覆盖。
    fn load_config(config_path: Option<&str>) -> Result<LabConfig> {
        let defaults = Config::try_from(&LabConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("LAB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration sources")?;

        let sections: ConfigSections = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        let reference_stats = match config_path {
            Some(path) => read_reference_stats(path)?,
            None => HashMap::new(),
        };

        match config_path {
            Some(path) => info!("Configuration loaded successfully from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(LabConfig {
            logging: sections.logging,
            quality_gate: sections.quality_gate,
            scheduler: sections.scheduler,
            store: sections.store,
            reference_stats,
        })
    }

    /// 获取配置
    pub async fn get_config(&self) -> LabConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置，验证失败时保持原配置
    pub async fn update_config(&self, new_config: LabConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.update_config(new_config).await
    }

    /// 保存配置到文件，未指定路径时写回加载时的文件
    pub async fn save_config(&self, path: Option<&str>) -> Result<()> {
        let target = path
            .or(self.config_path.as_deref())
            .context("No configuration file path to save to")?;

        let config_str = {
            let config = self.config.read().await;
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?
        };

        tokio::fs::write(target, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", target);
        Ok(())
    }

    /// 按点分路径获取配置值，例如 "quality_gate.max_temperature"
    pub async fn get_value<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let config = self.config.read().await;
        let config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;
        let value = extract_nested_value(&config_json, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;

        serde_json::from_value(value.clone()).context("Failed to deserialize configuration value")
    }

    /// 按点分路径设置配置值，修改后的配置必须通过验证
    pub async fn set_value<T>(&self, path: &str, value: T) -> Result<()>
    where
        T: Serialize,
    {
        let value_json = serde_json::to_value(value).context("Failed to serialize value")?;

        let mut config = self.config.write().await;
        let mut config_json =
            serde_json::to_value(&*config).context("Failed to serialize config to JSON")?;
        let slot = extract_nested_value_mut(&mut config_json, path)
            .with_context(|| format!("Configuration path not found: {}", path))?;
        *slot = value_json;

        let updated: LabConfig = serde_json::from_value(config_json)
            .with_context(|| format!("Invalid value for configuration path: {}", path))?;
        self.validator.validate(&updated)?;
        *config = updated;

        info!("Configuration value updated: {}", path);
        Ok(())
    }

    /// 验证配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

/// 从 TOML 配置文件读取参考统计表
fn read_reference_stats(path: &str) -> Result<ReferenceStats> {
    let file = Path::new(path);
    let file = match file.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => file.to_path_buf(),
        None => file.with_extension("toml"),
        Some(other) => {
            warn!("Reference statistics are only read from TOML files, skipping {} file", other);
            return Ok(HashMap::new());
        }
    };

    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read configuration file: {}", file.display()))?;
    let table: ReferenceStatsTable =
        toml::from_str(&content).context("Failed to parse reference statistics")?;
    Ok(table.reference_stats)
}

fn extract_nested_value<'a>(root: &'a serde_json::Value, path: &str) -> Result<&'a serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current
            .as_object()
            .and_then(|map| map.get(part))
            .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
    }
    Ok(current)
}

fn extract_nested_value_mut<'a>(
    root: &'a mut serde_json::Value,
    path: &str,
) -> Result<&'a mut serde_json::Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current
            .as_object_mut()
            .and_then(|map| map.get_mut(part))
            .ok_or_else(|| anyhow::anyhow!("Path segment not found: {}", part))?;
    }
    Ok(current)
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "logging.level",
                validator: |config| {
                    crate::logging::build_filter(&config.logging.level).map(|_| ())
                },
            },
            ValidationRule {
                field_path: "quality_gate",
                validator: |config| {
                    let gate = &config.quality_gate;
                    if gate.min_temperature > gate.max_temperature {
                        Err(anyhow::anyhow!(
                            "Temperature window is empty: {} > {}",
                            gate.min_temperature,
                            gate.max_temperature
                        ))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "scheduler.reminder_interval_secs",
                validator: |config| {
                    if config.scheduler.reminder_interval_secs == 0 {
                        Err(anyhow::anyhow!("Reminder interval cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "scheduler.lookahead_hours",
                validator: |config| {
                    if config.scheduler.lookahead_hours < 0 {
                        Err(anyhow::anyhow!("Reminder lookahead cannot be negative"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "store.backend",
                validator: |config| {
                    if config.store.backend == "memory" {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("Unsupported store backend: {}", config.store.backend))
                    }
                },
            },
            ValidationRule {
                field_path: "reference_stats",
                validator: |config| {
                    for (test, analytes) in &config.reference_stats {
                        for (analyte, stats) in analytes {
                            if stats.std_dev.is_nan() || stats.std_dev <= 0.0 {
                                return Err(anyhow::anyhow!(
                                    "Standard deviation for {}/{} must be positive",
                                    test,
                                    analyte
                                ));
                            }
                        }
                    }
                    Ok(())
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &LabConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("Invalid {}: {}", rule.field_path, e));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
