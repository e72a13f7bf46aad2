//! 标本生命周期
//!
//! 协调状态图、验收质量关卡和保管链。每个操作在标本锁内完成
//! 加载、校验、修改副本、带版本保存，任何一步失败都不会留下部分修改。

use crate::acceptance::{AcceptanceOutcome, QualityCheckFailure, QualityGateConfig};
use crate::state_machine::StatusGraph;
use crate::store::{EntityLocks, SpecimenStore};
use chrono::{DateTime, Utc};
use lab_core::utils::{format_specimen_number, specimen_number_prefix};
use lab_core::{Clock, LabError, LifecycleState, NewSpecimen, Result, Specimen, SpecimenCatalog};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 质量检查失败时的拒收原因
pub const QUALITY_REJECTION_REASON: &str = "Failed quality control checks";

/// 质量检查失败的保管链注释事件
pub const QUALITY_CHECK_FAILED_EVENT: &str = "QUALITY_CHECK_FAILED";

/// 标本生命周期服务
pub struct SampleLifecycle {
    store: Arc<dyn SpecimenStore + Send + Sync>,
    catalog: Arc<dyn SpecimenCatalog>,
    clock: Arc<dyn Clock>,
    graph: StatusGraph,
    gate: QualityGateConfig,
    locks: EntityLocks,
    prefix_locks: EntityLocks,
}

impl std::fmt::Debug for SampleLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLifecycle")
            .field("catalog", &self.catalog)
            .field("clock", &self.clock)
            .field("gate", &self.gate)
            .finish()
    }
}

impl SampleLifecycle {
    pub fn new(
        store: Arc<dyn SpecimenStore + Send + Sync>,
        catalog: Arc<dyn SpecimenCatalog>,
        clock: Arc<dyn Clock>,
        gate: QualityGateConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            graph: StatusGraph::new(),
            gate,
            locks: EntityLocks::new(),
            prefix_locks: EntityLocks::new(),
        }
    }

    pub fn graph(&self) -> &StatusGraph {
        &self.graph
    }

    /// 采集新标本
    ///
    /// 编号为 `YYYYMMDD-类型代码-序号`，序号在同一前缀锁内计算
    pub async fn collect(&self, request: NewSpecimen) -> Result<Specimen> {
        if request.collected_by.trim().is_empty() {
            return Err(LabError::Validation("Collector is required".to_string()));
        }

        let now = self.clock.now();
        let prefix = specimen_number_prefix(now.date_naive(), request.specimen_type);

        let _guard = self.prefix_locks.acquire(&prefix).await;
        let sequence = self.store.count_with_prefix(&prefix).await? + 1;
        let number = format_specimen_number(&prefix, sequence);

        let specimen = Specimen::collected(number, request, now);
        self.store.insert(specimen.clone()).await?;

        info!(
            "Specimen {} collected for visit {} by {}",
            specimen.specimen_number, specimen.visit_id, specimen.collected_by
        );
        Ok(specimen)
    }

    /// 运送中
    pub async fn mark_in_transit(&self, number: &str, actor: &str) -> Result<Specimen> {
        self.advance(
            number,
            LifecycleState::InTransit,
            actor,
            "Sample in transit to laboratory".to_string(),
            |_, _| {},
        )
        .await
    }

    /// 实验室接收
    pub async fn receive(
        &self,
        number: &str,
        received_by: &str,
        temperature: Option<f64>,
        condition: Option<String>,
    ) -> Result<Specimen> {
        let actor = received_by.to_string();
        self.advance(
            number,
            LifecycleState::Received,
            received_by,
            "Sample received at laboratory".to_string(),
            move |specimen, now| {
                specimen.received_at = Some(now);
                specimen.received_by = Some(actor);
                specimen.receipt_temperature = temperature;
                specimen.receipt_condition = condition;
            },
        )
        .await
    }

    /// 登记入系统
    pub async fn accession(&self, number: &str, actor: &str) -> Result<Specimen> {
        self.advance(
            number,
            LifecycleState::Accessioned,
            actor,
            "Sample logged into laboratory system".to_string(),
            |_, _| {},
        )
        .await
    }

    /// 验收
    ///
    /// 质量关卡不通过时标本转为拒收，调用仍然成功
    pub async fn accept(
        &self,
        number: &str,
        accepted_by: &str,
        volume_received: f64,
        container_type: Option<String>,
        preservative: Option<String>,
    ) -> Result<AcceptanceOutcome> {
        let _guard = self.locks.acquire(number).await;
        let current = self.load_required(number).await?;
        self.graph
            .transition(number, current.status, LifecycleState::Accepted)?;

        let requirements = self.catalog.lookup(current.specimen_type);
        let failures = self.gate.check(&current, &requirements, volume_received);

        if !failures.is_empty() {
            let specimen = self
                .reject_for_quality(current, accepted_by, &failures)
                .await?;
            return Ok(AcceptanceOutcome::Rejected { specimen, failures });
        }

        let actor = accepted_by.to_string();
        let minimum_volume = requirements.minimum_volume;
        let specimen = self
            .commit(
                current,
                LifecycleState::Accepted,
                accepted_by,
                "Sample accepted for testing".to_string(),
                move |specimen, now| {
                    specimen.accepted_at = Some(now);
                    specimen.accepted_by = Some(actor);
                    specimen.volume_received = Some(volume_received);
                    specimen.volume_required = Some(minimum_volume);
                    specimen.container_type = container_type;
                    specimen.preservative = preservative;
                },
            )
            .await?;

        Ok(AcceptanceOutcome::Accepted(specimen))
    }

    /// 拒收
    pub async fn reject(&self, number: &str, rejected_by: &str, reason: &str) -> Result<Specimen> {
        if reason.trim().is_empty() {
            return Err(LabError::Validation("Rejection reason is required".to_string()));
        }

        let _guard = self.locks.acquire(number).await;
        let current = self.load_required(number).await?;
        self.graph
            .transition(number, current.status, LifecycleState::Rejected)?;

        let specimen = self.commit_rejection(current, rejected_by, reason).await?;
        warn!("Specimen {} rejected by {}: {}", number, rejected_by, reason);
        Ok(specimen)
    }

    /// 开始前处理
    pub async fn start_processing(
        &self,
        number: &str,
        processed_by: &str,
        storage_location: Option<String>,
        storage_temperature: Option<f64>,
    ) -> Result<Specimen> {
        let actor = processed_by.to_string();
        let catalog = self.catalog.clone();
        self.advance(
            number,
            LifecycleState::Processing,
            processed_by,
            "Sample processing started".to_string(),
            move |specimen, now| {
                specimen.processing_started_at = Some(now);
                specimen.processed_by = Some(actor);
                if storage_location.is_some() {
                    specimen.storage_location = storage_location;
                }
                if storage_temperature.is_some() {
                    specimen.storage_temperature = storage_temperature;
                }
                let conditions = catalog.lookup(specimen.specimen_type).storage_temperature;
                specimen.storage_conditions = Some(conditions.to_string());
            },
        )
        .await
    }

    /// 分装
    pub async fn aliquot(&self, number: &str, actor: &str) -> Result<Specimen> {
        self.advance(
            number,
            LifecycleState::Aliquoted,
            actor,
            "Sample divided into aliquots".to_string(),
            |_, _| {},
        )
        .await
    }

    /// 开始检测
    pub async fn start_analysis(&self, number: &str, analyst: &str) -> Result<Specimen> {
        let actor = analyst.to_string();
        self.advance(
            number,
            LifecycleState::InAnalysis,
            analyst,
            "Sample analysis started".to_string(),
            move |specimen, now| {
                specimen.analysis_started_at = Some(now);
                specimen.analyst = Some(actor);
            },
        )
        .await
    }

    /// 检测完成
    pub async fn complete_analysis(
        &self,
        number: &str,
        analyst: &str,
        quality_indicators: Option<serde_json::Value>,
    ) -> Result<Specimen> {
        self.advance(
            number,
            LifecycleState::AnalysisComplete,
            analyst,
            "Sample analysis completed".to_string(),
            move |specimen, now| {
                specimen.processing_completed_at = Some(now);
                if quality_indicators.is_some() {
                    specimen.quality_indicators = quality_indicators;
                }
            },
        )
        .await
    }

    /// 提交审核
    pub async fn begin_review(&self, number: &str, reviewer: &str) -> Result<Specimen> {
        self.advance(
            number,
            LifecycleState::UnderReview,
            reviewer,
            "Sample results submitted for review".to_string(),
            |_, _| {},
        )
        .await
    }

    /// 审核完成
    pub async fn review(&self, number: &str, reviewer: &str) -> Result<Specimen> {
        let actor = reviewer.to_string();
        self.advance(
            number,
            LifecycleState::Reviewed,
            reviewer,
            "Sample results reviewed".to_string(),
            move |specimen, now| {
                specimen.reviewed_at = Some(now);
                specimen.reviewed_by = Some(actor);
            },
        )
        .await
    }

    /// 入库保存
    pub async fn store(
        &self,
        number: &str,
        actor: &str,
        location: &str,
        temperature: Option<f64>,
        conditions: Option<String>,
    ) -> Result<Specimen> {
        if location.trim().is_empty() {
            return Err(LabError::Validation("Storage location is required".to_string()));
        }

        let location = location.to_string();
        self.advance(
            number,
            LifecycleState::Stored,
            actor,
            format!("Sample stored at {}", location),
            move |specimen, _| {
                specimen.storage_location = Some(location);
                specimen.storage_temperature = temperature;
                if conditions.is_some() {
                    specimen.storage_conditions = conditions;
                }
            },
        )
        .await
    }

    /// 销毁
    pub async fn dispose(
        &self,
        number: &str,
        disposed_by: &str,
        method: &str,
        batch: Option<String>,
    ) -> Result<Specimen> {
        if method.trim().is_empty() {
            return Err(LabError::Validation("Disposal method is required".to_string()));
        }

        let actor = disposed_by.to_string();
        let method = method.to_string();
        self.advance(
            number,
            LifecycleState::Disposed,
            disposed_by,
            format!("Sample disposed using method: {}", method),
            move |specimen, now| {
                specimen.disposed_at = Some(now);
                specimen.disposed_by = Some(actor);
                specimen.disposal_method = Some(method);
                specimen.disposal_batch = batch;
            },
        )
        .await
    }

    /// 暂停
    pub async fn hold(&self, number: &str, actor: &str, reason: &str) -> Result<Specimen> {
        let reason = reason.to_string();
        self.advance(
            number,
            LifecycleState::OnHold,
            actor,
            format!("Sample placed on hold: {}", reason),
            move |specimen, _| {
                specimen.hold_reason = Some(reason);
            },
        )
        .await
    }

    /// 从暂停恢复到指定状态
    ///
    /// 终止状态需通过拒收或销毁操作进入，以便记录对应字段
    pub async fn resume(&self, number: &str, actor: &str, target: LifecycleState) -> Result<Specimen> {
        if StatusGraph::is_terminal(target) {
            return Err(LabError::Validation(format!(
                "Cannot resume specimen {} into terminal state {}",
                number, target
            )));
        }

        let _guard = self.locks.acquire(number).await;
        let current = self.load_required(number).await?;
        if current.status != LifecycleState::OnHold {
            return Err(LabError::Validation(format!(
                "Specimen {} is not on hold (current status {})",
                number, current.status
            )));
        }
        self.graph.transition(number, current.status, target)?;

        self.commit(
            current,
            target,
            actor,
            "Sample processing resumed".to_string(),
            |specimen, _| {
                specimen.hold_reason = None;
            },
        )
        .await
    }

    /// 召回，允许从已保存或已销毁状态进入
    pub async fn recall(&self, number: &str, actor: &str, reason: &str) -> Result<Specimen> {
        let _guard = self.locks.acquire(number).await;
        let current = self.load_required(number).await?;
        if !self.graph.can_recall(current.status) {
            return Err(LabError::InvalidTransition {
                specimen: number.to_string(),
                from: current.status,
                to: LifecycleState::Recalled,
            });
        }

        let reason = reason.to_string();
        self.commit(
            current,
            LifecycleState::Recalled,
            actor,
            format!("Sample recalled: {}", reason),
            move |specimen, _| {
                specimen.recall_reason = Some(reason);
            },
        )
        .await
    }

    /// 查询标本
    pub async fn get(&self, number: &str) -> Result<Specimen> {
        self.load_required(number).await
    }

    pub async fn list_by_status(&self, status: LifecycleState) -> Result<Vec<Specimen>> {
        self.store.list_by_status(status).await
    }

    pub async fn list_by_visit(&self, visit_id: u64) -> Result<Vec<Specimen>> {
        self.store.list_by_visit(visit_id).await
    }

    /// 标本当前状态的推荐后继
    pub async fn next_steps(&self, number: &str) -> Result<Vec<LifecycleState>> {
        let specimen = self.load_required(number).await?;
        Ok(self.graph.next_possible(specimen.status))
    }

    async fn load_required(&self, number: &str) -> Result<Specimen> {
        self.store
            .load(number)
            .await?
            .ok_or_else(|| LabError::NotFound(format!("Specimen {}", number)))
    }

    /// 普通转换：加锁、加载、校验后提交
    async fn advance<F>(
        &self,
        number: &str,
        to: LifecycleState,
        actor: &str,
        description: String,
        mutate: F,
    ) -> Result<Specimen>
    where
        F: FnOnce(&mut Specimen, DateTime<Utc>) + Send,
    {
        let _guard = self.locks.acquire(number).await;
        let current = self.load_required(number).await?;
        self.graph.transition(number, current.status, to)?;
        self.commit(current, to, actor, description, mutate).await
    }

    /// 在副本上修改状态、阶段字段和保管链，带版本保存
    ///
    /// 调用方必须持有标本锁并已完成转换校验
    async fn commit<F>(
        &self,
        current: Specimen,
        to: LifecycleState,
        actor: &str,
        description: String,
        mutate: F,
    ) -> Result<Specimen>
    where
        F: FnOnce(&mut Specimen, DateTime<Utc>) + Send,
    {
        let now = self.clock.now();
        let from = current.status;
        let expected_version = current.version;

        let mut working = current;
        mutate(&mut working, now);
        working.status = to;
        working.updated_at = now;
        working.custody.append(now, to.as_str(), actor, &description);

        let saved = self.store.save(working, expected_version).await?;
        info!(
            "Specimen {} transitioned {} -> {} by {}",
            saved.specimen_number, from, to, actor
        );
        Ok(saved)
    }

    async fn commit_rejection(&self, current: Specimen, rejected_by: &str, reason: &str) -> Result<Specimen> {
        let actor = rejected_by.to_string();
        let stored_reason = reason.to_string();
        self.commit(
            current,
            LifecycleState::Rejected,
            rejected_by,
            format!("Sample rejected: {}", reason),
            move |specimen, now| {
                specimen.rejected = true;
                specimen.rejection_reason = Some(stored_reason);
                specimen.rejected_by = Some(actor);
                specimen.rejected_at = Some(now);
            },
        )
        .await
    }

    /// 质量关卡失败：先记录检查失败注释，再转为拒收，一次保存
    async fn reject_for_quality(
        &self,
        mut current: Specimen,
        actor: &str,
        failures: &[QualityCheckFailure],
    ) -> Result<Specimen> {
        let number = current.specimen_number.clone();
        self.graph
            .transition(&number, current.status, LifecycleState::Rejected)?;

        let summary = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        debug!("Specimen {} failed quality checks: {}", number, summary);

        current
            .custody
            .append(self.clock.now(), QUALITY_CHECK_FAILED_EVENT, actor, &summary);
        let specimen = self
            .commit_rejection(current, actor, QUALITY_REJECTION_REASON)
            .await?;

        warn!(
            "Specimen {} rejected at acceptance by {}: {}",
            number, actor, summary
        );
        Ok(specimen)
    }
}
