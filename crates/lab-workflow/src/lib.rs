//! # 实验室工作流模块
//!
//! 提供标本与质控的核心业务流程，包括：
//! - 状态图：标本生命周期的转换规则与状态元数据
//! - 标本生命周期：采集到销毁的各项操作、验收质量关卡和保管链记录
//! - Westgard 规则引擎：判定质控测定是否在控
//! - 质控计划：计算下次到期时间并发送到期提醒
//! - 存储接口：标本与质控存储特征及内存实现

pub mod acceptance;
pub mod engine;
pub mod lifecycle;
pub mod quality_control;
pub mod scheduling;
pub mod state_machine;
pub mod store;
pub mod westgard;

// 重新导出主要类型
pub use acceptance::{AcceptanceOutcome, QualityCheckFailure, QualityGateConfig};
pub use engine::{LabEngine, LabOverview};
pub use lifecycle::{SampleLifecycle, QUALITY_CHECK_FAILED_EVENT, QUALITY_REJECTION_REASON};
pub use quality_control::{QcDefinitionUpdate, QcService};
pub use scheduling::{compute_next_due, LoggingReminderSink, QcScheduler, ReminderSink, SchedulerConfig};
pub use state_machine::{StateMetadata, StatusGraph};
pub use store::{
    EntityGuard, EntityLocks, InMemoryQcStore, InMemoryReferenceStats, InMemorySpecimenStore, QcStore,
    ReferenceStatsSource, SpecimenStore,
};
pub use westgard::{ControlSeries, WestgardEngine, WestgardReport};
