//! 标本数据模型定义

use crate::custody::CustodyLog;
use crate::error::LabError;
use crate::specimen_type::SpecimenType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 标本生命周期状态
///
/// 只携带身份，转换规则与元数据见工作流模块的状态图
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Collected,        // 已采集
    InTransit,        // 运送中
    Received,         // 已接收
    Accessioned,      // 已登记
    Accepted,         // 已验收
    Rejected,         // 已拒收
    Processing,       // 前处理中
    Aliquoted,        // 已分装
    InAnalysis,       // 检测中
    AnalysisComplete, // 检测完成
    UnderReview,      // 审核中
    Reviewed,         // 已审核
    Stored,           // 已保存
    Disposed,         // 已销毁
    OnHold,           // 暂停
    Recalled,         // 已召回
}

impl LifecycleState {
    /// 按流程顺序排列的全部状态
    pub const ALL: [LifecycleState; 16] = [
        LifecycleState::Collected,
        LifecycleState::InTransit,
        LifecycleState::Received,
        LifecycleState::Accessioned,
        LifecycleState::Accepted,
        LifecycleState::Rejected,
        LifecycleState::Processing,
        LifecycleState::Aliquoted,
        LifecycleState::InAnalysis,
        LifecycleState::AnalysisComplete,
        LifecycleState::UnderReview,
        LifecycleState::Reviewed,
        LifecycleState::Stored,
        LifecycleState::Disposed,
        LifecycleState::OnHold,
        LifecycleState::Recalled,
    ];

    /// 持久化与监管记录中使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Collected => "COLLECTED",
            LifecycleState::InTransit => "IN_TRANSIT",
            LifecycleState::Received => "RECEIVED",
            LifecycleState::Accessioned => "ACCESSIONED",
            LifecycleState::Accepted => "ACCEPTED",
            LifecycleState::Rejected => "REJECTED",
            LifecycleState::Processing => "PROCESSING",
            LifecycleState::Aliquoted => "ALIQUOTED",
            LifecycleState::InAnalysis => "IN_ANALYSIS",
            LifecycleState::AnalysisComplete => "ANALYSIS_COMPLETE",
            LifecycleState::UnderReview => "UNDER_REVIEW",
            LifecycleState::Reviewed => "REVIEWED",
            LifecycleState::Stored => "STORED",
            LifecycleState::Disposed => "DISPOSED",
            LifecycleState::OnHold => "ON_HOLD",
            LifecycleState::Recalled => "RECALLED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        LifecycleState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| LabError::Validation(format!("Unknown lifecycle state: {}", s)))
    }
}

/// 标本
///
/// 标本拥有自己的保管链日志，各阶段字段由生命周期操作填写
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Specimen {
    pub specimen_number: String,
    pub visit_id: u64,
    pub specimen_type: SpecimenType,
    pub status: LifecycleState,

    // 采集
    pub collected_at: DateTime<Utc>,
    pub collected_by: String,
    pub collection_site: Option<String>,
    pub collection_conditions: Option<serde_json::Value>, // 空腹、采集时间等

    // 接收
    pub received_at: Option<DateTime<Utc>>,
    pub received_by: Option<String>,
    pub receipt_temperature: Option<f64>, // 摄氏度
    pub receipt_condition: Option<String>, // Good, Hemolyzed, Clotted 等

    // 验收
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<String>,
    pub volume_received: Option<f64>, // mL
    pub volume_required: Option<f64>, // mL
    pub container_type: Option<String>,
    pub preservative: Option<String>,

    // 前处理与检测
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub analysis_started_at: Option<DateTime<Utc>>,
    pub analyst: Option<String>,
    pub quality_indicators: Option<serde_json::Value>, // pH、外观等

    // 审核
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,

    // 保存
    pub storage_location: Option<String>,
    pub storage_temperature: Option<f64>,
    pub storage_conditions: Option<String>,

    // 拒收
    pub rejected: bool,
    pub rejection_reason: Option<String>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,

    // 销毁
    pub disposed_at: Option<DateTime<Utc>>,
    pub disposed_by: Option<String>,
    pub disposal_method: Option<String>,
    pub disposal_batch: Option<String>,

    // 暂停与召回
    pub hold_reason: Option<String>,
    pub recall_reason: Option<String>,

    pub comments: Option<String>,
    pub custody: CustodyLog,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 乐观并发版本号，每次保存递增
    pub version: u64,
}

/// 新标本采集信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSpecimen {
    pub visit_id: u64,
    pub specimen_type: SpecimenType,
    pub collected_by: String,
    pub collection_site: Option<String>,
    pub collection_conditions: Option<serde_json::Value>,
}

impl Specimen {
    /// 以已采集状态创建标本，并初始化保管链
    pub fn collected(
        specimen_number: String,
        request: NewSpecimen,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let custody = CustodyLog::started(
            collected_at,
            &request.collected_by,
            "Sample collected from patient",
        );

        Self {
            specimen_number,
            visit_id: request.visit_id,
            specimen_type: request.specimen_type,
            status: LifecycleState::Collected,
            collected_at,
            collected_by: request.collected_by,
            collection_site: request.collection_site,
            collection_conditions: request.collection_conditions,
            received_at: None,
            received_by: None,
            receipt_temperature: None,
            receipt_condition: None,
            accepted_at: None,
            accepted_by: None,
            volume_received: None,
            volume_required: None,
            container_type: None,
            preservative: None,
            processing_started_at: None,
            processing_completed_at: None,
            processed_by: None,
            analysis_started_at: None,
            analyst: None,
            quality_indicators: None,
            reviewed_at: None,
            reviewed_by: None,
            storage_location: None,
            storage_temperature: None,
            storage_conditions: None,
            rejected: false,
            rejection_reason: None,
            rejected_by: None,
            rejected_at: None,
            disposed_at: None,
            disposed_by: None,
            disposal_method: None,
            disposal_batch: None,
            hold_reason: None,
            recall_reason: None,
            comments: None,
            custody,
            created_at: collected_at,
            updated_at: collected_at,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_names_round_trip() {
        for state in LifecycleState::ALL {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
        assert_eq!("on hold".parse::<LifecycleState>().unwrap(), LifecycleState::OnHold);
        assert!("FROZEN".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn test_state_serde_uses_screaming_names() {
        let json = serde_json::to_string(&LifecycleState::AnalysisComplete).unwrap();
        assert_eq!(json, "\"ANALYSIS_COMPLETE\"");
    }

    #[test]
    fn test_collected_specimen_seeds_custody() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let specimen = Specimen::collected(
            "20261019-SER-0001".to_string(),
            NewSpecimen {
                visit_id: 42,
                specimen_type: SpecimenType::Serum,
                collected_by: "phleb-01".to_string(),
                collection_site: Some("Left arm".to_string()),
                collection_conditions: Some(serde_json::json!({"fasting": true})),
            },
            at,
        );

        assert_eq!(specimen.status, LifecycleState::Collected);
        assert_eq!(specimen.custody.len(), 1);
        let first = &specimen.custody.events()[0];
        assert_eq!(first.event, "COLLECTED");
        assert_eq!(first.actor, "phleb-01");
        assert_eq!(first.timestamp, at);
    }

    #[test]
    fn test_specimen_json_round_trip_is_lossless() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let mut specimen = Specimen::collected(
            "20261019-WB-0003".to_string(),
            NewSpecimen {
                visit_id: 7,
                specimen_type: SpecimenType::WholeBlood,
                collected_by: "phleb-02".to_string(),
                collection_site: None,
                collection_conditions: None,
            },
            at,
        );
        specimen.custody.append(at, "RECEIVED", "desk", "Sample received at laboratory");
        specimen.receipt_temperature = Some(4.5);

        let json = serde_json::to_string(&specimen).unwrap();
        let restored: Specimen = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, specimen);
    }
}
