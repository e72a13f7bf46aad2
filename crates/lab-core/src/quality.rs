//! 质控数据模型定义

use crate::error::{LabError, Result};
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Westgard 质控规则
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WestgardRule {
    #[serde(rename = "1-3s")]
    OneThreeS,
    #[serde(rename = "2-2s")]
    TwoTwoS,
    #[serde(rename = "R-4s")]
    RangeFourS,
    #[serde(rename = "4-1s")]
    FourOneS,
    #[serde(rename = "10-x")]
    TenX,
}

impl WestgardRule {
    pub const ALL: [WestgardRule; 5] = [
        WestgardRule::OneThreeS,
        WestgardRule::TwoTwoS,
        WestgardRule::RangeFourS,
        WestgardRule::FourOneS,
        WestgardRule::TenX,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WestgardRule::OneThreeS => "1-3s",
            WestgardRule::TwoTwoS => "2-2s",
            WestgardRule::RangeFourS => "R-4s",
            WestgardRule::FourOneS => "4-1s",
            WestgardRule::TenX => "10-x",
        }
    }

    /// 规则需要的最少结果数
    pub fn required_results(&self) -> usize {
        match self {
            WestgardRule::OneThreeS => 1,
            WestgardRule::TwoTwoS | WestgardRule::RangeFourS => 2,
            WestgardRule::FourOneS => 4,
            WestgardRule::TenX => 10,
        }
    }

    /// 解析逗号分隔的规则集，例如 "1-3s,2-2s,R-4s"
    pub fn parse_set(rules: &str) -> Result<Vec<WestgardRule>> {
        let parsed = rules
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse::<WestgardRule>)
            .collect::<Result<Vec<WestgardRule>>>()?;
        Ok(Self::unique(parsed))
    }

    /// 去除重复规则，保留首次出现的顺序
    pub fn unique(rules: impl IntoIterator<Item = WestgardRule>) -> Vec<WestgardRule> {
        let mut unique: Vec<WestgardRule> = Vec::new();
        for rule in rules {
            if !unique.contains(&rule) {
                unique.push(rule);
            }
        }
        unique
    }
}

impl fmt::Display for WestgardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WestgardRule {
    type Err = LabError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "13s" => Ok(WestgardRule::OneThreeS),
            "22s" => Ok(WestgardRule::TwoTwoS),
            "r4s" => Ok(WestgardRule::RangeFourS),
            "41s" => Ok(WestgardRule::FourOneS),
            "10x" => Ok(WestgardRule::TenX),
            _ => Err(LabError::Validation(format!("Unknown Westgard rule: {}", s))),
        }
    }
}

/// 质控频率
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Daily,
    Weekly {
        #[serde(rename = "dayOfWeek")]
        day_of_week: Weekday,
    },
    Monthly {
        #[serde(rename = "dayOfMonth")]
        day_of_month: u32,
    },
    SpecificDates {
        dates: Vec<NaiveDate>,
    },
}

impl Frequency {
    /// 验证频率参数
    pub fn validate(&self) -> Result<()> {
        match self {
            Frequency::Monthly { day_of_month } if !(1..=31).contains(day_of_month) => Err(
                LabError::Validation(format!("Day of month out of range: {}", day_of_month)),
            ),
            _ => Ok(()),
        }
    }
}

/// 分析物参考统计（来自测试定义）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AnalyteStats {
    pub mean: f64,
    #[serde(rename = "stdDev", alias = "std_dev")]
    pub std_dev: f64,
}

/// 质控定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityControlDefinition {
    pub id: Uuid,
    pub test_definition_id: String,
    pub control_name: String,
    pub control_level: u8, // 1/2/3 低、中、高值
    pub frequency: Frequency,
    pub westgard_rules: Vec<WestgardRule>,
    pub created_at: DateTime<Utc>,
    pub next_due_date: Option<DateTime<Utc>>,
    pub version: u64,
}

/// 新质控定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQualityControl {
    pub test_definition_id: String,
    pub control_name: String,
    pub control_level: u8,
    pub frequency: Frequency,
    pub westgard_rules: Vec<WestgardRule>,
}

impl NewQualityControl {
    pub fn validate(&self) -> Result<()> {
        if self.control_name.trim().is_empty() {
            return Err(LabError::Validation("Control name is required".to_string()));
        }
        if self.control_level == 0 {
            return Err(LabError::Validation("Control level must be positive".to_string()));
        }
        self.frequency.validate()
    }
}

/// 质控运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QcStatus {
    Passed,        // 在控
    Failed,        // 失控
    Indeterminate, // 无法判定
}

/// 单条规则违反
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleViolation {
    pub rule: WestgardRule,
    pub analyte: String,
}

/// 质控结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResult {
    pub id: Uuid,
    pub definition_id: Uuid,
    pub tested_at: DateTime<Utc>,
    /// 分析物名称 -> 测定值
    pub values: BTreeMap<String, f64>,
    pub passed: bool,
    pub status: QcStatus,
    pub violations: Vec<RuleViolation>,
    pub indeterminate_reason: Option<String>,
}

impl ControlResult {
    /// 尚未评估的测定记录
    pub fn measured(definition_id: Uuid, tested_at: DateTime<Utc>, values: BTreeMap<String, f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id,
            tested_at,
            values,
            passed: false,
            status: QcStatus::Indeterminate,
            violations: Vec::new(),
            indeterminate_reason: None,
        }
    }

    pub fn value(&self, analyte: &str) -> Option<f64> {
        self.values.get(analyte).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_parsing_accepts_common_spellings() {
        assert_eq!("1-3s".parse::<WestgardRule>().unwrap(), WestgardRule::OneThreeS);
        assert_eq!("1_3S".parse::<WestgardRule>().unwrap(), WestgardRule::OneThreeS);
        assert_eq!("r-4s".parse::<WestgardRule>().unwrap(), WestgardRule::RangeFourS);
        assert_eq!("10x".parse::<WestgardRule>().unwrap(), WestgardRule::TenX);
        assert!("3-1s".parse::<WestgardRule>().is_err());
    }

    #[test]
    fn test_parse_set_dedups_and_keeps_order() {
        let rules = WestgardRule::parse_set("2-2s, 1-3s,2_2s,,R-4s").unwrap();
        assert_eq!(
            rules,
            vec![WestgardRule::TwoTwoS, WestgardRule::OneThreeS, WestgardRule::RangeFourS]
        );
    }

    #[test]
    fn test_frequency_json_shape() {
        let weekly: Frequency =
            serde_json::from_str(r#"{"type":"WEEKLY","dayOfWeek":"Monday"}"#).unwrap();
        assert_eq!(weekly, Frequency::Weekly { day_of_week: Weekday::Mon });

        let dates: Frequency =
            serde_json::from_str(r#"{"type":"SPECIFIC_DATES","dates":["2026-11-01","2026-12-01"]}"#)
                .unwrap();
        assert!(matches!(dates, Frequency::SpecificDates { ref dates } if dates.len() == 2));

        let daily = serde_json::to_value(&Frequency::Daily).unwrap();
        assert_eq!(daily["type"], "DAILY");
    }

    #[test]
    fn test_monthly_day_validation() {
        assert!(Frequency::Monthly { day_of_month: 0 }.validate().is_err());
        assert!(Frequency::Monthly { day_of_month: 32 }.validate().is_err());
        assert!(Frequency::Monthly { day_of_month: 31 }.validate().is_ok());
    }

    #[test]
    fn test_analyte_stats_reads_std_dev_key() {
        let stats: AnalyteStats = serde_json::from_str(r#"{"mean":10.0,"stdDev":1.5}"#).unwrap();
        assert_eq!(stats.std_dev, 1.5);
    }

    #[test]
    fn test_unique_rules_keep_first_occurrence() {
        let rules = WestgardRule::unique([
            WestgardRule::RangeFourS,
            WestgardRule::OneThreeS,
            WestgardRule::RangeFourS,
            WestgardRule::OneThreeS,
        ]);
        assert_eq!(rules, vec![WestgardRule::RangeFourS, WestgardRule::OneThreeS]);
    }

    #[test]
    fn test_control_result_json_is_lossless() {
        let tested_at = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 19, 7, 30, 0).unwrap();
        let mut result = ControlResult::measured(
            Uuid::new_v4(),
            tested_at,
            BTreeMap::from([
                ("glucose".to_string(), 5.550000000000001),
                ("lactate".to_string(), 0.1 + 0.2),
                ("urea".to_string(), 7.123456789012345),
            ]),
        );
        result.violations = vec![
            RuleViolation { rule: WestgardRule::RangeFourS, analyte: "urea".to_string() },
            RuleViolation { rule: WestgardRule::OneThreeS, analyte: "glucose".to_string() },
            RuleViolation { rule: WestgardRule::RangeFourS, analyte: "glucose".to_string() },
        ];
        result.indeterminate_reason = Some("No reference statistics for ketones".to_string());

        let json = serde_json::to_string(&result).unwrap();
        let restored: ControlResult = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, result);
        assert_eq!(restored.status, QcStatus::Indeterminate);
        assert_eq!(restored.value("lactate").map(f64::to_bits), Some((0.1f64 + 0.2).to_bits()));
        let analytes: Vec<&str> = restored.violations.iter().map(|v| v.analyte.as_str()).collect();
        assert_eq!(analytes, vec!["urea", "glucose", "glucose"]);
    }
}
