//! 标本状态图
//!
//! 管理标本从采集到销毁的状态转换规则。转换许可由有序规则判定，
//! 推荐后继表由候选表经同一判定过滤得到，两者不会出现分歧。

use lab_core::{LabError, LifecycleState, Result};
use std::collections::HashMap;

/// 状态元数据，供界面和合规展示使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMetadata {
    pub sequence_order: u8,
    pub label: &'static str,
    pub description: &'static str,
    pub color: &'static str,
    pub available_for_testing: bool,
    pub testing_complete: bool,
    pub terminal: bool,
}

const DEFAULT_REQUIREMENTS: &[&str] = &[
    "Follow standard operating procedures",
    "Maintain complete documentation",
    "Ensure traceability",
];

/// 标本状态图
#[derive(Debug)]
pub struct StatusGraph {
    successors: HashMap<LifecycleState, Vec<LifecycleState>>,
}

impl StatusGraph {
    /// 创建新的状态图实例
    pub fn new() -> Self {
        let mut successors = HashMap::new();

        for from in LifecycleState::ALL {
            let allowed: Vec<LifecycleState> = candidate_successors(from)
                .iter()
                .copied()
                .filter(|to| Self::permits(from, *to))
                .collect();
            successors.insert(from, allowed);
        }

        Self { successors }
    }

    /// 转换判定
    ///
    /// 1. 终止状态不再转换
    /// 2. 任何非终止状态都可以暂停
    /// 3. 暂停可以恢复到任意状态
    /// 4. 召回的标本只能回到前处理或检测
    /// 5. 只有已保存（或已销毁）的标本可以召回
    /// 6. 只有验收及之前的标本可以拒收
    /// 7. 其余情况只能前进或保持
    pub fn permits(from: LifecycleState, to: LifecycleState) -> bool {
        use LifecycleState::{Disposed, InAnalysis, OnHold, Processing, Recalled, Rejected, Stored};

        if Self::is_terminal(from) {
            return false;
        }
        if to == OnHold {
            return true;
        }
        if from == OnHold {
            return true;
        }
        if from == Recalled {
            return matches!(to, Processing | InAnalysis);
        }
        if to == Recalled {
            return matches!(from, Stored | Disposed);
        }
        if to == Rejected {
            return Self::sequence_order(from) <= Self::sequence_order(LifecycleState::Accepted);
        }

        Self::sequence_order(to) >= Self::sequence_order(from)
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        Self::permits(from, to)
    }

    /// 显式召回路径：已保存或已销毁的标本
    pub fn can_recall(&self, from: LifecycleState) -> bool {
        matches!(from, LifecycleState::Stored | LifecycleState::Disposed)
    }

    /// 执行状态转换校验
    pub fn transition(
        &self,
        specimen: &str,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<LifecycleState> {
        if self.can_transition(from, to) {
            Ok(to)
        } else {
            Err(LabError::InvalidTransition {
                specimen: specimen.to_string(),
                from,
                to,
            })
        }
    }

    /// 推荐的后继状态
    pub fn next_possible(&self, state: LifecycleState) -> Vec<LifecycleState> {
        self.successors.get(&state).cloned().unwrap_or_default()
    }

    /// 是否为推荐后继
    pub fn is_suggested(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.successors
            .get(&from)
            .map(|next| next.contains(&to))
            .unwrap_or(false)
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<LifecycleState> {
        LifecycleState::ALL.to_vec()
    }

    pub fn is_terminal(state: LifecycleState) -> bool {
        Self::metadata(state).terminal
    }

    pub fn sequence_order(state: LifecycleState) -> u8 {
        Self::metadata(state).sequence_order
    }

    /// 状态元数据
    pub fn metadata(state: LifecycleState) -> StateMetadata {
        use LifecycleState::*;

        let (sequence_order, label, description, color) = match state {
            Collected => (1, "Collected", "Sample collected from patient", "#FFA500"),
            InTransit => (2, "In Transit", "Sample being transported to laboratory", "#FFA500"),
            Received => (3, "Received", "Sample received at laboratory", "#FFA500"),
            Accessioned => (4, "Accessioned", "Sample logged into laboratory system", "#FFA500"),
            Accepted => (5, "Accepted", "Sample passed quality control checks", "#0066CC"),
            Rejected => (6, "Rejected", "Sample failed quality control - unsuitable for testing", "#CC0000"),
            Processing => (7, "Processing", "Sample being prepared for analysis", "#0066CC"),
            Aliquoted => (8, "Aliquoted", "Sample divided into portions for different tests", "#0066CC"),
            InAnalysis => (9, "In Analysis", "Sample currently being analyzed", "#0066CC"),
            AnalysisComplete => (10, "Analysis Complete", "All requested tests completed", "#FF6600"),
            UnderReview => (11, "Under Review", "Results being reviewed by qualified personnel", "#FF6600"),
            Reviewed => (12, "Reviewed", "Results reviewed and approved", "#00AA00"),
            Stored => (13, "Stored", "Sample stored for retention period", "#00AA00"),
            Disposed => (14, "Disposed", "Sample disposed according to protocols", "#666666"),
            OnHold => (15, "On Hold", "Sample processing temporarily suspended", "#FFCC00"),
            Recalled => (16, "Recalled", "Sample recalled for additional testing", "#9900CC"),
        };

        StateMetadata {
            sequence_order,
            label,
            description,
            color,
            available_for_testing: matches!(state, Accepted | Processing | Aliquoted | InAnalysis),
            testing_complete: matches!(
                state,
                AnalysisComplete | UnderReview | Reviewed | Stored | Disposed
            ),
            terminal: matches!(state, Rejected | Disposed),
        }
    }

    /// NABL 合规要求
    pub fn compliance_requirements(state: LifecycleState) -> &'static [&'static str] {
        match state {
            LifecycleState::Collected => &[
                "Record collection date and time",
                "Record collector identification",
                "Document collection conditions",
                "Verify patient identification",
            ],
            LifecycleState::Received => &[
                "Record receipt date and time",
                "Record receiver identification",
                "Check sample integrity",
                "Verify sample identification",
            ],
            LifecycleState::Accepted => &[
                "Verify sample quality",
                "Check volume adequacy",
                "Confirm container type",
                "Document acceptance criteria",
            ],
            LifecycleState::Rejected => &[
                "Document rejection reason",
                "Record rejecting personnel",
                "Notify requesting physician",
                "Follow rejection protocol",
            ],
            LifecycleState::Reviewed => &[
                "Technical review completed",
                "Results validated",
                "Quality control verified",
                "Authorized by qualified personnel",
            ],
            LifecycleState::Disposed => &[
                "Follow disposal protocol",
                "Record disposal method",
                "Document disposal date",
                "Maintain disposal records",
            ],
            _ => DEFAULT_REQUIREMENTS,
        }
    }
}

impl Default for StatusGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// 候选后继表，最终结果还要经过转换判定过滤
fn candidate_successors(state: LifecycleState) -> &'static [LifecycleState] {
    use LifecycleState::*;

    match state {
        Collected => &[InTransit, Received, Rejected],
        InTransit => &[Received, Rejected],
        Received => &[Accessioned, Rejected],
        Accessioned => &[Accepted, Rejected],
        Accepted => &[Processing],
        Processing => &[Aliquoted, InAnalysis],
        Aliquoted => &[InAnalysis],
        InAnalysis => &[AnalysisComplete],
        AnalysisComplete => &[UnderReview],
        UnderReview => &[Reviewed],
        Reviewed => &[Stored],
        Stored => &[Disposed, Recalled],
        Recalled => &[Processing, InAnalysis],
        OnHold => &[Processing, InAnalysis, UnderReview, Stored],
        Rejected | Disposed => &[],
    }
}
