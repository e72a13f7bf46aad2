//! 实验室工作流引擎
//!
//! 组装标本生命周期、质控服务和质控计划器，提供统一入口

use crate::acceptance::QualityGateConfig;
use crate::lifecycle::SampleLifecycle;
use crate::quality_control::QcService;
use crate::scheduling::{QcScheduler, ReminderSink, SchedulerConfig};
use crate::store::{
    InMemoryQcStore, InMemoryReferenceStats, InMemorySpecimenStore, QcStore,
    ReferenceStatsSource, SpecimenStore,
};
use chrono::{DateTime, Utc};
use lab_core::{Clock, LifecycleState, Result, SpecimenCatalog, StandardCatalog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 工作流引擎
pub struct LabEngine {
    lifecycle: Arc<SampleLifecycle>,
    quality_control: Arc<QcService>,
    scheduler: Arc<QcScheduler>,
    clock: Arc<dyn Clock>,
    scheduler_config: SchedulerConfig,
}

/// 工作流概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabOverview {
    pub generated_at: DateTime<Utc>,
    pub specimens_by_status: BTreeMap<LifecycleState, usize>,
    pub qc_definitions: usize,
    pub qc_due: usize,
}

impl LabEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        specimens: Arc<dyn SpecimenStore + Send + Sync>,
        qc: Arc<dyn QcStore + Send + Sync>,
        stats: Arc<dyn ReferenceStatsSource + Send + Sync>,
        catalog: Arc<dyn SpecimenCatalog>,
        sink: Arc<dyn ReminderSink + Send + Sync>,
        clock: Arc<dyn Clock>,
        gate: QualityGateConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let lifecycle = SampleLifecycle::new(specimens, catalog, clock.clone(), gate);
        let quality_control = QcService::new(qc.clone(), stats, clock.clone());
        let scheduler = QcScheduler::new(qc, sink, clock.clone(), scheduler_config.clone());

        Self {
            lifecycle: Arc::new(lifecycle),
            quality_control: Arc::new(quality_control),
            scheduler: Arc::new(scheduler),
            clock,
            scheduler_config,
        }
    }

    /// 基于内存存储和标准标本目录的引擎
    pub fn in_memory(
        stats: Arc<InMemoryReferenceStats>,
        sink: Arc<dyn ReminderSink + Send + Sync>,
        clock: Arc<dyn Clock>,
        gate: QualityGateConfig,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        Self::new(
            Arc::new(InMemorySpecimenStore::new()),
            Arc::new(InMemoryQcStore::new()),
            stats,
            Arc::new(StandardCatalog),
            sink,
            clock,
            gate,
            scheduler_config,
        )
    }

    pub fn lifecycle(&self) -> &Arc<SampleLifecycle> {
        &self.lifecycle
    }

    pub fn quality_control(&self) -> &Arc<QcService> {
        &self.quality_control
    }

    pub fn scheduler(&self) -> &Arc<QcScheduler> {
        &self.scheduler
    }

    /// 统计各状态标本数和即将到期的质控
    pub async fn overview(&self) -> Result<LabOverview> {
        let mut specimens_by_status = BTreeMap::new();
        for state in LifecycleState::ALL {
            let count = self.lifecycle.list_by_status(state).await?.len();
            if count > 0 {
                specimens_by_status.insert(state, count);
            }
        }

        let now = self.clock.now();
        let definitions = self.quality_control.list_definitions().await?;
        let qc_due =
            QcScheduler::due_for_reminder(&definitions, now, self.scheduler_config.lookahead()).len();

        Ok(LabOverview {
            generated_at: now,
            specimens_by_status,
            qc_definitions: definitions.len(),
            qc_due,
        })
    }
}
