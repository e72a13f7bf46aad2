//! 质控流程集成测试

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
use lab_core::{
    AnalyteStats, FixedClock, Frequency, NewQualityControl, QcStatus, QualityControlDefinition,
    Result, WestgardRule,
};
use lab_workflow::{
    InMemoryQcStore, InMemoryReferenceStats, QcScheduler, QcService, ReminderSink,
    SchedulerConfig,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Default)]
struct RecordingSink {
    reminders: Mutex<Vec<(String, DateTime<Utc>)>>,
}

#[async_trait]
impl ReminderSink for RecordingSink {
    async fn remind(&self, definition: &QualityControlDefinition, due: DateTime<Utc>) -> Result<()> {
        self.reminders
            .lock()
            .await
            .push((definition.control_name.clone(), due));
        Ok(())
    }
}

struct Lab {
    clock: Arc<FixedClock>,
    store: Arc<InMemoryQcStore>,
    service: QcService,
}

async fn lab() -> Lab {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 10, 19, 7, 30, 0).unwrap(),
    ));
    let stats = Arc::new(InMemoryReferenceStats::new());
    stats
        .set("CHEM-GLU", "glucose", AnalyteStats { mean: 10.0, std_dev: 1.0 })
        .await;
    stats
        .set("CHEM-GLU", "lactate", AnalyteStats { mean: 2.0, std_dev: 0.2 })
        .await;

    let store = Arc::new(InMemoryQcStore::new());
    let service = QcService::new(store.clone(), stats, clock.clone());
    Lab { clock, store, service }
}

fn control(name: &str, frequency: Frequency, rules: &str) -> NewQualityControl {
    NewQualityControl {
        test_definition_id: "CHEM-GLU".to_string(),
        control_name: name.to_string(),
        control_level: 2,
        frequency,
        westgard_rules: WestgardRule::parse_set(rules).unwrap(),
    }
}

fn run(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
    values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_ten_x_trips_on_tenth_consecutive_high_run() {
    let lab = lab().await;
    let definition = lab
        .service
        .register_definition(control("Glucose L2", Frequency::Daily, "10-x"))
        .await
        .unwrap();

    for day in 0..9 {
        let result = lab
            .service
            .record_result(definition.id, run(&[("glucose", 10.4)]))
            .await
            .unwrap();
        assert_eq!(result.status, QcStatus::Passed, "run {}", day + 1);
        lab.clock.advance(Duration::days(1));
    }

    let tenth = lab
        .service
        .record_result(definition.id, run(&[("glucose", 10.4)]))
        .await
        .unwrap();
    assert_eq!(tenth.status, QcStatus::Failed);
    assert_eq!(tenth.violations.len(), 1);
    assert_eq!(tenth.violations[0].rule, WestgardRule::TenX);
}

#[tokio::test]
async fn test_multi_analyte_run_reports_each_violation() {
    let lab = lab().await;
    let definition = lab
        .service
        .register_definition(control("Glucose L2", Frequency::Daily, "1-3s,R-4s"))
        .await
        .unwrap();

    lab.service
        .record_result(definition.id, run(&[("glucose", 8.0), ("lactate", 2.0)]))
        .await
        .unwrap();
    let second = lab
        .service
        .record_result(definition.id, run(&[("glucose", 12.5), ("lactate", 2.9)]))
        .await
        .unwrap();

    assert!(!second.passed);
    let found: Vec<(WestgardRule, &str)> = second
        .violations
        .iter()
        .map(|v| (v.rule, v.analyte.as_str()))
        .collect();
    assert_eq!(
        found,
        vec![
            (WestgardRule::RangeFourS, "glucose"),
            (WestgardRule::OneThreeS, "lactate"),
            (WestgardRule::RangeFourS, "lactate"),
        ]
    );
}

#[tokio::test]
async fn test_unknown_analyte_is_indeterminate_not_passed() {
    let lab = lab().await;
    let definition = lab
        .service
        .register_definition(control("Glucose L2", Frequency::Daily, "1-3s"))
        .await
        .unwrap();

    let result = lab
        .service
        .record_result(definition.id, run(&[("glucose", 10.0), ("ketones", 0.4)]))
        .await
        .unwrap();

    assert_eq!(result.status, QcStatus::Indeterminate);
    assert!(!result.passed);
    assert!(result.indeterminate_reason.unwrap().contains("ketones"));
}

#[tokio::test]
async fn test_reminders_cover_due_definitions() {
    let lab = lab().await;
    // 星期一 07:30 注册：每日质控明天到期，周三质控两天后到期
    lab.service
        .register_definition(control("Daily glucose", Frequency::Daily, "1-3s"))
        .await
        .unwrap();
    lab.service
        .register_definition(control(
            "Wednesday glucose",
            Frequency::Weekly { day_of_week: Weekday::Wed },
            "1-3s",
        ))
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let scheduler = QcScheduler::new(
        lab.store.clone(),
        sink.clone(),
        lab.clock.clone(),
        SchedulerConfig::default(),
    );

    assert_eq!(scheduler.tick().await.unwrap(), 0);

    lab.clock.advance(Duration::hours(12));
    assert_eq!(scheduler.tick().await.unwrap(), 1);

    lab.clock.advance(Duration::hours(24));
    assert_eq!(scheduler.tick().await.unwrap(), 2);

    let reminders = sink.reminders.lock().await;
    assert_eq!(reminders[0].0, "Daily glucose");
    assert_eq!(
        reminders[0].1,
        Utc.with_ymd_and_hms(2026, 10, 20, 7, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn test_scheduler_loop_stops_on_shutdown() {
    let lab = lab().await;
    let scheduler = Arc::new(QcScheduler::new(
        lab.store.clone(),
        Arc::new(RecordingSink::default()),
        lab.clock.clone(),
        SchedulerConfig {
            reminder_interval_secs: 1,
            lookahead_hours: 24,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
