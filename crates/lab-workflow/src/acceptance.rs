//! 标本验收质量关卡
//!
//! 验收前检查采集量、接收状态和冷链温度，任一项不合格即拒收。

use lab_core::{Specimen, SpecimenTypeInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 质量关卡配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityGateConfig {
    /// 冷藏标本接收温度下限（摄氏度）
    pub min_temperature: f64,
    /// 冷藏标本接收温度上限（摄氏度）
    pub max_temperature: f64,
    /// 直接拒收的接收状态，比较时忽略大小写
    pub rejecting_conditions: Vec<String>,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_temperature: 2.0,
            max_temperature: 8.0,
            rejecting_conditions: vec![
                "Hemolyzed".to_string(),
                "Clotted".to_string(),
                "Contaminated".to_string(),
            ],
        }
    }
}

/// 单项质量检查失败
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "check", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCheckFailure {
    InsufficientVolume { received: f64, minimum: f64 },
    UnacceptableCondition { condition: String },
    TemperatureOutOfRange { temperature: f64, min: f64, max: f64 },
}

impl fmt::Display for QualityCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityCheckFailure::InsufficientVolume { received, minimum } => write!(
                f,
                "Insufficient volume: {} mL received, {} mL required",
                received, minimum
            ),
            QualityCheckFailure::UnacceptableCondition { condition } => {
                write!(f, "Unacceptable sample condition: {}", condition)
            }
            QualityCheckFailure::TemperatureOutOfRange { temperature, min, max } => write!(
                f,
                "Receipt temperature {}°C outside {}-{}°C",
                temperature, min, max
            ),
        }
    }
}

/// 验收结果
///
/// 质量关卡不通过不是错误，调用成功并返回被拒收的标本
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptanceOutcome {
    Accepted(Specimen),
    Rejected {
        specimen: Specimen,
        failures: Vec<QualityCheckFailure>,
    },
}

impl AcceptanceOutcome {
    pub fn specimen(&self) -> &Specimen {
        match self {
            AcceptanceOutcome::Accepted(specimen) => specimen,
            AcceptanceOutcome::Rejected { specimen, .. } => specimen,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AcceptanceOutcome::Accepted(_))
    }
}

impl QualityGateConfig {
    /// 执行全部检查，返回所有失败项；空列表表示通过
    pub fn check(
        &self,
        specimen: &Specimen,
        requirements: &SpecimenTypeInfo,
        volume_received: f64,
    ) -> Vec<QualityCheckFailure> {
        let mut failures = Vec::new();

        if volume_received < requirements.minimum_volume {
            failures.push(QualityCheckFailure::InsufficientVolume {
                received: volume_received,
                minimum: requirements.minimum_volume,
            });
        }

        if let Some(condition) = specimen.receipt_condition.as_deref() {
            let condition = condition.trim();
            if self
                .rejecting_conditions
                .iter()
                .any(|c| c.eq_ignore_ascii_case(condition))
            {
                failures.push(QualityCheckFailure::UnacceptableCondition {
                    condition: condition.to_string(),
                });
            }
        }

        // 未记录接收温度时不检查冷链
        if requirements.requires_refrigeration {
            if let Some(temperature) = specimen.receipt_temperature {
                if temperature < self.min_temperature || temperature > self.max_temperature {
                    failures.push(QualityCheckFailure::TemperatureOutOfRange {
                        temperature,
                        min: self.min_temperature,
                        max: self.max_temperature,
                    });
                }
            }
        }

        failures
    }
}
