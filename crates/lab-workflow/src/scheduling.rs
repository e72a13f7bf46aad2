//! 质控计划
//!
//! 计算质控定义的下次到期时间，并定期提醒即将到期的质控。

use crate::store::QcStore;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use lab_core::{Clock, Frequency, QualityControlDefinition, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 根据频率计算下次到期时间
///
/// 纯函数，结果只取决于频率和当前时间。每日、每周、每月保留当前时刻的时分秒，
/// 指定日期按当日零点计算；没有未来日期时返回 None。
pub fn compute_next_due(frequency: &Frequency, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match frequency {
        Frequency::Daily => Some(now + Duration::days(1)),
        Frequency::Weekly { day_of_week } => {
            let today = now.weekday().num_days_from_monday() as i64;
            let target = day_of_week.num_days_from_monday() as i64;
            let days = match (target - today).rem_euclid(7) {
                0 => 7,
                d => d,
            };
            Some(now + Duration::days(days))
        }
        Frequency::Monthly { day_of_month } => {
            if !(1..=31).contains(day_of_month) {
                return None;
            }
            let this_month = day_in_month(now.date_naive(), *day_of_month, now.time())?;
            if this_month > now {
                return Some(this_month);
            }
            let next = now.date_naive().with_day(1)?.checked_add_months(Months::new(1))?;
            day_in_month(next, *day_of_month, now.time())
        }
        Frequency::SpecificDates { dates } => dates
            .iter()
            .filter_map(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .filter(|at| *at > now)
            .min(),
    }
}

/// `month` 所在月份的第 `day` 天，超出月末时取月末
fn day_in_month(month: NaiveDate, day: u32, time: NaiveTime) -> Option<DateTime<Utc>> {
    let first = month.with_day(1)?;
    let last_day = first.checked_add_months(Months::new(1))?.pred_opt()?.day();
    let date = first.with_day(day.min(last_day))?;
    Some(date.and_time(time).and_utc())
}

/// 计划任务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 提醒检查间隔（秒）
    pub reminder_interval_secs: u64,
    /// 提前提醒的时间窗口（小时）
    pub lookahead_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reminder_interval_secs: 3600,
            lookahead_hours: 24,
        }
    }
}

impl SchedulerConfig {
    pub fn lookahead(&self) -> Duration {
        Duration::hours(self.lookahead_hours)
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reminder_interval_secs)
    }
}

/// 质控到期提醒接收方
#[async_trait::async_trait]
pub trait ReminderSink {
    async fn remind(&self, definition: &QualityControlDefinition, due: DateTime<Utc>) -> Result<()>;
}

/// 只写日志的提醒接收方
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReminderSink;

#[async_trait::async_trait]
impl ReminderSink for LoggingReminderSink {
    async fn remind(&self, definition: &QualityControlDefinition, due: DateTime<Utc>) -> Result<()> {
        warn!(
            "QC due: {} (level {}, test {}) due at {}",
            definition.control_name, definition.control_level, definition.test_definition_id, due
        );
        Ok(())
    }
}

/// 质控计划器
pub struct QcScheduler {
    store: Arc<dyn QcStore + Send + Sync>,
    sink: Arc<dyn ReminderSink + Send + Sync>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl QcScheduler {
    pub fn new(
        store: Arc<dyn QcStore + Send + Sync>,
        sink: Arc<dyn ReminderSink + Send + Sync>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            config,
        }
    }

    /// 下次到期时间早于 `now + lookahead` 的定义
    pub fn due_for_reminder(
        definitions: &[QualityControlDefinition],
        now: DateTime<Utc>,
        lookahead: Duration,
    ) -> Vec<&QualityControlDefinition> {
        let horizon = now + lookahead;
        definitions
            .iter()
            .filter(|definition| matches!(definition.next_due_date, Some(due) if due < horizon))
            .collect()
    }

    /// 执行一次提醒检查，返回发出的提醒数
    ///
    /// 单个提醒失败只记录日志，不影响其他定义
    pub async fn tick(&self) -> Result<usize> {
        let now = self.clock.now();
        let definitions = self.store.list_definitions().await?;
        let due = Self::due_for_reminder(&definitions, now, self.config.lookahead());

        let mut sent = 0;
        for definition in due {
            let Some(due_at) = definition.next_due_date else {
                continue;
            };
            match self.sink.remind(definition, due_at).await {
                Ok(()) => sent += 1,
                Err(e) => error!(
                    "Failed to send QC reminder for {}: {}",
                    definition.id, e
                ),
            }
        }

        debug!("QC reminder check at {}: {} reminders sent", now, sent);
        Ok(sent)
    }

    /// 按配置间隔循环检查，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval());
        info!(
            "QC reminder loop started (interval {}s, lookahead {}h)",
            self.config.reminder_interval_secs, self.config.lookahead_hours
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("QC reminder check failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("QC reminder loop stopped");
    }
}
