//! 质控服务
//!
//! 管理质控定义，记录质控结果并用 Westgard 规则判定在控/失控。

use crate::scheduling::compute_next_due;
use crate::store::{EntityLocks, QcStore, ReferenceStatsSource};
use crate::westgard::{ControlSeries, WestgardEngine, WestgardReport};
use lab_core::{
    Clock, ControlResult, Frequency, LabError, NewQualityControl, QcStatus,
    QualityControlDefinition, Result, WestgardRule,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 评估窗口的最大长度，即规则中最长的 10-x
fn window_size(rules: &[WestgardRule]) -> usize {
    rules.iter().map(|r| r.required_results()).max().unwrap_or(1)
}

/// 质控定义修改，未提供的字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcDefinitionUpdate {
    pub control_name: Option<String>,
    pub control_level: Option<u8>,
    pub frequency: Option<Frequency>,
    pub westgard_rules: Option<Vec<WestgardRule>>,
}

/// 质控服务
pub struct QcService {
    store: Arc<dyn QcStore + Send + Sync>,
    stats: Arc<dyn ReferenceStatsSource + Send + Sync>,
    clock: Arc<dyn Clock>,
    engine: WestgardEngine,
    locks: EntityLocks,
}

impl QcService {
    pub fn new(
        store: Arc<dyn QcStore + Send + Sync>,
        stats: Arc<dyn ReferenceStatsSource + Send + Sync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            stats,
            clock,
            engine: WestgardEngine::new(),
            locks: EntityLocks::new(),
        }
    }

    /// 注册质控定义并计算首次到期时间
    pub async fn register_definition(&self, request: NewQualityControl) -> Result<QualityControlDefinition> {
        request.validate()?;

        let now = self.clock.now();
        let definition = QualityControlDefinition {
            id: Uuid::new_v4(),
            test_definition_id: request.test_definition_id,
            control_name: request.control_name,
            control_level: request.control_level,
            next_due_date: compute_next_due(&request.frequency, now),
            frequency: request.frequency,
            westgard_rules: WestgardRule::unique(request.westgard_rules),
            created_at: now,
            version: 0,
        };

        self.store.insert_definition(definition.clone()).await?;
        info!(
            "Registered QC definition {} ({}, level {}) next due {:?}",
            definition.id, definition.control_name, definition.control_level, definition.next_due_date
        );
        Ok(definition)
    }

    /// 修改质控定义，频率变化时重新计算到期时间
    pub async fn update_definition(
        &self,
        id: Uuid,
        update: QcDefinitionUpdate,
    ) -> Result<QualityControlDefinition> {
        let _guard = self.locks.acquire(&id.to_string()).await;
        let current = self.load_required(id).await?;
        let expected_version = current.version;

        let mut working = current;
        if let Some(name) = update.control_name {
            if name.trim().is_empty() {
                return Err(LabError::Validation("Control name is required".to_string()));
            }
            working.control_name = name;
        }
        if let Some(level) = update.control_level {
            if level == 0 {
                return Err(LabError::Validation("Control level must be positive".to_string()));
            }
            working.control_level = level;
        }
        if let Some(rules) = update.westgard_rules {
            working.westgard_rules = WestgardRule::unique(rules);
        }
        if let Some(frequency) = update.frequency {
            frequency.validate()?;
            working.next_due_date = compute_next_due(&frequency, self.clock.now());
            working.frequency = frequency;
        }

        let saved = self.store.save_definition(working, expected_version).await?;
        info!("Updated QC definition {} (version {})", saved.id, saved.version);
        Ok(saved)
    }

    /// 记录一次质控测定
    ///
    /// 缺少参考统计时结果记为无法判定，仍然保存并返回
    pub async fn record_result(&self, id: Uuid, values: BTreeMap<String, f64>) -> Result<ControlResult> {
        if values.is_empty() {
            return Err(LabError::Validation("At least one analyte value is required".to_string()));
        }

        let _guard = self.locks.acquire(&id.to_string()).await;
        let mut definition = self.load_required(id).await?;
        let expected_version = definition.version;
        let now = self.clock.now();

        let mut result = ControlResult::measured(id, now, values);
        let history = self
            .store
            .results(id, Some(window_size(&definition.westgard_rules)))
            .await?;
        let mut series = ControlSeries::new(history);
        series.push(result.clone());

        match self.evaluate_series(&definition, &series).await {
            Ok(report) => {
                result.passed = report.passed;
                result.status = if report.passed {
                    QcStatus::Passed
                } else {
                    QcStatus::Failed
                };
                result.violations = report.violations;
            }
            Err(e @ LabError::MissingReferenceStats { .. }) => {
                result.passed = false;
                result.status = QcStatus::Indeterminate;
                result.indeterminate_reason = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        definition.next_due_date = compute_next_due(&definition.frequency, now);
        let definition = self
            .store
            .record_run(definition, expected_version, result.clone())
            .await?;

        match result.status {
            QcStatus::Passed => info!(
                "QC run {} for {} passed, next due {:?}",
                result.id, definition.control_name, definition.next_due_date
            ),
            QcStatus::Failed => warn!(
                "QC run {} for {} failed: {:?}",
                result.id, definition.control_name, result.violations
            ),
            QcStatus::Indeterminate => warn!(
                "QC run {} for {} indeterminate: {}",
                result.id,
                definition.control_name,
                result.indeterminate_reason.as_deref().unwrap_or_default()
            ),
        }

        Ok(result)
    }

    /// 重新评估最近的窗口，缺少参考统计时返回错误
    pub async fn evaluate_latest(&self, id: Uuid) -> Result<WestgardReport> {
        let definition = self.load_required(id).await?;
        let history = self
            .store
            .results(id, Some(window_size(&definition.westgard_rules)))
            .await?;
        self.evaluate_series(&definition, &ControlSeries::new(history)).await
    }

    pub async fn results(&self, id: Uuid, limit: Option<usize>) -> Result<Vec<ControlResult>> {
        self.load_required(id).await?;
        self.store.results(id, limit).await
    }

    pub async fn get_definition(&self, id: Uuid) -> Result<QualityControlDefinition> {
        self.load_required(id).await
    }

    pub async fn list_definitions(&self) -> Result<Vec<QualityControlDefinition>> {
        self.store.list_definitions().await
    }

    async fn evaluate_series(
        &self,
        definition: &QualityControlDefinition,
        series: &ControlSeries,
    ) -> Result<WestgardReport> {
        let stats = self.stats.analyte_stats(&definition.test_definition_id).await?;
        self.engine.evaluate(
            &definition.id.to_string(),
            &definition.westgard_rules,
            series,
            &stats,
        )
    }

    async fn load_required(&self, id: Uuid) -> Result<QualityControlDefinition> {
        self.store
            .load_definition(id)
            .await?
            .ok_or_else(|| LabError::NotFound(format!("Quality control definition {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryQcStore, InMemoryReferenceStats};
    use chrono::{Duration, TimeZone, Utc, Weekday};
    use lab_core::{AnalyteStats, FixedClock};

    struct Fixture {
        clock: Arc<FixedClock>,
        stats: Arc<InMemoryReferenceStats>,
        service: QcService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap(),
        ));
        let stats = Arc::new(InMemoryReferenceStats::new());
        let service = QcService::new(Arc::new(InMemoryQcStore::new()), stats.clone(), clock.clone());
        Fixture { clock, stats, service }
    }

    fn glucose_control(rules: Vec<WestgardRule>) -> NewQualityControl {
        NewQualityControl {
            test_definition_id: "GLU".to_string(),
            control_name: "Glucose L1".to_string(),
            control_level: 1,
            frequency: Frequency::Daily,
            westgard_rules: rules,
        }
    }

    fn glucose(v: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("glucose".to_string(), v)])
    }

    #[tokio::test]
    async fn test_register_computes_next_due() {
        let f = fixture();
        let definition = f
            .service
            .register_definition(glucose_control(vec![WestgardRule::OneThreeS]))
            .await
            .unwrap();
        assert_eq!(definition.next_due_date, Some(f.clock.now() + Duration::days(1)));
        assert_eq!(f.service.list_definitions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_validates_request() {
        let f = fixture();
        let mut request = glucose_control(vec![]);
        request.frequency = Frequency::Monthly { day_of_month: 40 };
        assert!(matches!(
            f.service.register_definition(request).await,
            Err(LabError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_record_result_evaluates_window() {
        let f = fixture();
        f.stats.set("GLU", "glucose", AnalyteStats { mean: 10.0, std_dev: 1.0 }).await;
        let definition = f
            .service
            .register_definition(glucose_control(vec![WestgardRule::OneThreeS, WestgardRule::TwoTwoS]))
            .await
            .unwrap();

        let first = f.service.record_result(definition.id, glucose(12.1)).await.unwrap();
        assert_eq!(first.status, QcStatus::Passed);
        assert!(first.passed);

        f.clock.advance(Duration::hours(24));
        let second = f.service.record_result(definition.id, glucose(12.2)).await.unwrap();
        assert_eq!(second.status, QcStatus::Failed);
        assert_eq!(second.violations[0].rule, WestgardRule::TwoTwoS);

        let stored = f.service.get_definition(definition.id).await.unwrap();
        assert_eq!(stored.next_due_date, Some(f.clock.now() + Duration::days(1)));
        assert_eq!(stored.version, 2);
        assert_eq!(f.service.results(definition.id, None).await.unwrap().len(), 2);

        let report = f.service.evaluate_latest(definition.id).await.unwrap();
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_missing_stats_records_indeterminate() {
        let f = fixture();
        let definition = f
            .service
            .register_definition(glucose_control(vec![WestgardRule::OneThreeS]))
            .await
            .unwrap();

        let result = f.service.record_result(definition.id, glucose(10.0)).await.unwrap();
        assert_eq!(result.status, QcStatus::Indeterminate);
        assert!(!result.passed);
        assert!(result.indeterminate_reason.is_some());

        let stored = f.service.results(definition.id, None).await.unwrap();
        assert_eq!(stored, vec![result]);

        assert!(matches!(
            f.service.evaluate_latest(definition.id).await,
            Err(LabError::MissingReferenceStats { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_definition_recomputes_schedule() {
        let f = fixture();
        let definition = f
            .service
            .register_definition(glucose_control(vec![]))
            .await
            .unwrap();

        let updated = f
            .service
            .update_definition(
                definition.id,
                QcDefinitionUpdate {
                    frequency: Some(Frequency::Weekly { day_of_week: Weekday::Wed }),
                    westgard_rules: Some(WestgardRule::parse_set("1-3s,R-4s").unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            updated.next_due_date,
            Some(Utc.with_ymd_and_hms(2026, 10, 21, 7, 0, 0).unwrap())
        );
        assert_eq!(updated.westgard_rules.len(), 2);
        assert_eq!(updated.version, 1);
    }

    /// 结果写入总是失败的存储
    struct FullDiskStore {
        inner: InMemoryQcStore,
    }

    #[async_trait::async_trait]
    impl QcStore for FullDiskStore {
        async fn load_definition(&self, id: Uuid) -> Result<Option<QualityControlDefinition>> {
            self.inner.load_definition(id).await
        }

        async fn insert_definition(&self, definition: QualityControlDefinition) -> Result<()> {
            self.inner.insert_definition(definition).await
        }

        async fn save_definition(
            &self,
            definition: QualityControlDefinition,
            expected_version: u64,
        ) -> Result<QualityControlDefinition> {
            self.inner.save_definition(definition, expected_version).await
        }

        async fn record_run(
            &self,
            _definition: QualityControlDefinition,
            _expected_version: u64,
            _result: ControlResult,
        ) -> Result<QualityControlDefinition> {
            Err(LabError::Storage("disk full".to_string()))
        }

        async fn results(&self, definition_id: Uuid, limit: Option<usize>) -> Result<Vec<ControlResult>> {
            self.inner.results(definition_id, limit).await
        }

        async fn list_definitions(&self) -> Result<Vec<QualityControlDefinition>> {
            self.inner.list_definitions().await
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_definition_untouched() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap(),
        ));
        let stats = Arc::new(InMemoryReferenceStats::new());
        stats.set("GLU", "glucose", AnalyteStats { mean: 10.0, std_dev: 1.0 }).await;
        let service = QcService::new(
            Arc::new(FullDiskStore { inner: InMemoryQcStore::new() }),
            stats,
            clock.clone(),
        );

        let definition = service
            .register_definition(glucose_control(vec![WestgardRule::OneThreeS]))
            .await
            .unwrap();
        clock.advance(Duration::days(3));

        let err = service.record_result(definition.id, glucose(10.2)).await.unwrap_err();
        assert!(matches!(err, LabError::Storage(_)));

        let stored = service.get_definition(definition.id).await.unwrap();
        assert_eq!(stored, definition);
        assert!(service.results(definition.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_rules_are_stored_once() {
        let f = fixture();
        f.stats.set("GLU", "glucose", AnalyteStats { mean: 10.0, std_dev: 1.0 }).await;
        let definition = f
            .service
            .register_definition(glucose_control(vec![WestgardRule::OneThreeS, WestgardRule::OneThreeS]))
            .await
            .unwrap();
        assert_eq!(definition.westgard_rules, vec![WestgardRule::OneThreeS]);

        let updated = f
            .service
            .update_definition(
                definition.id,
                QcDefinitionUpdate {
                    westgard_rules: Some(vec![
                        WestgardRule::RangeFourS,
                        WestgardRule::OneThreeS,
                        WestgardRule::RangeFourS,
                    ]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            updated.westgard_rules,
            vec![WestgardRule::RangeFourS, WestgardRule::OneThreeS]
        );

        let result = f.service.record_result(definition.id, glucose(13.5)).await.unwrap();
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].rule, WestgardRule::OneThreeS);
    }

    #[tokio::test]
    async fn test_unknown_definition() {
        let f = fixture();
        assert!(matches!(
            f.service.record_result(Uuid::new_v4(), glucose(10.0)).await,
            Err(LabError::NotFound(_))
        ));
    }
}
