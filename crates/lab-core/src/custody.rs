//! 保管链
//!
//! 只追加的标本流转记录，每个事件记录时间、事件名、经手人和说明

use crate::models::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 保管链事件，写入后不可修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustodyEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub actor: String,
    pub description: String,
}

/// 标本保管链
///
/// 没有删除或编辑接口，长度只增不减
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustodyLog {
    events: Vec<CustodyEvent>,
}

impl CustodyLog {
    /// 以采集事件开始的保管链，首条记录总是说明谁完成了采集
    pub fn started(at: DateTime<Utc>, collected_by: &str, description: &str) -> Self {
        let mut log = Self::default();
        log.append(at, LifecycleState::Collected.as_str(), collected_by, description);
        log
    }

    /// 追加事件
    pub fn append(&mut self, at: DateTime<Utc>, event: &str, actor: &str, description: &str) {
        self.events.push(CustodyEvent {
            timestamp: at,
            event: event.to_string(),
            actor: actor.to_string(),
            description: description.to_string(),
        });
    }

    pub fn events(&self) -> &[CustodyEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&CustodyEvent> {
        self.events.last()
    }

    /// 回放状态历史
    ///
    /// 事件名是状态名的记录还原为状态，质量判定等注释性事件被跳过
    pub fn replay(&self) -> Vec<(DateTime<Utc>, LifecycleState)> {
        self.events
            .iter()
            .filter_map(|event| {
                event
                    .event
                    .parse::<LifecycleState>()
                    .ok()
                    .map(|state| (event.timestamp, state))
            })
            .collect()
    }

    /// 回放得到的当前状态
    pub fn replayed_state(&self) -> Option<LifecycleState> {
        self.replay().last().map(|(_, state)| *state)
    }
}
