//! Westgard 质控规则引擎
//!
//! 对质控序列的尾部窗口逐个分析物评估已配置的规则。
//! 历史不足的规则不参与判定，只记录调试日志。

use lab_core::{AnalyteStats, ControlResult, LabError, Result, RuleViolation, WestgardRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 单个质控定义的有序测定序列，最早的在前
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlSeries {
    results: Vec<ControlResult>,
}

impl ControlSeries {
    pub fn new(results: Vec<ControlResult>) -> Self {
        Self { results }
    }

    pub fn push(&mut self, result: ControlResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn latest(&self) -> Option<&ControlResult> {
        self.results.last()
    }

    pub fn results(&self) -> &[ControlResult] {
        &self.results
    }

    /// 最后 `n` 次测定中某分析物的值；历史不足或其中有缺失时返回 None
    pub fn trailing_values(&self, analyte: &str, n: usize) -> Option<Vec<f64>> {
        if n == 0 || self.results.len() < n {
            return None;
        }
        self.results[self.results.len() - n..]
            .iter()
            .map(|result| result.value(analyte))
            .collect()
    }
}

/// 评估报告
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WestgardReport {
    pub passed: bool,
    pub violations: Vec<RuleViolation>,
    /// 因历史不足未评估的规则
    pub skipped: Vec<RuleViolation>,
}

impl WestgardReport {
    fn new() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }
}

/// Westgard 规则引擎
#[derive(Debug, Default, Clone, Copy)]
pub struct WestgardEngine;

impl WestgardEngine {
    pub fn new() -> Self {
        Self
    }

    /// 评估序列最新测定涉及的全部分析物
    ///
    /// `definition` 只用于错误信息。最新测定中的分析物缺少参考统计时返回
    /// `MissingReferenceStats`；空序列直接通过。
    pub fn evaluate(
        &self,
        definition: &str,
        rules: &[WestgardRule],
        series: &ControlSeries,
        stats: &HashMap<String, AnalyteStats>,
    ) -> Result<WestgardReport> {
        let mut report = WestgardReport::new();
        let Some(latest) = series.latest() else {
            return Ok(report);
        };

        for analyte in latest.values.keys() {
            let analyte_stats = stats.get(analyte).ok_or_else(|| LabError::MissingReferenceStats {
                definition: definition.to_string(),
                analyte: analyte.clone(),
            })?;

            for rule in rules {
                let Some(window) = series.trailing_values(analyte, rule.required_results()) else {
                    debug!(
                        "Rule {} not evaluated for {} on {}: insufficient history ({} results)",
                        rule,
                        analyte,
                        definition,
                        series.len()
                    );
                    report.skipped.push(RuleViolation {
                        rule: *rule,
                        analyte: analyte.clone(),
                    });
                    continue;
                };

                if violates(*rule, &window, analyte_stats) {
                    report.violations.push(RuleViolation {
                        rule: *rule,
                        analyte: analyte.clone(),
                    });
                }
            }
        }

        report.passed = report.violations.is_empty();
        Ok(report)
    }
}

/// 判断窗口是否违反规则，窗口长度等于规则所需结果数，最早的在前
pub fn violates(rule: WestgardRule, window: &[f64], stats: &AnalyteStats) -> bool {
    let mean = stats.mean;
    let sd = stats.std_dev;

    match rule {
        WestgardRule::OneThreeS => window
            .last()
            .map(|latest| (latest - mean).abs() > 3.0 * sd)
            .unwrap_or(false),
        WestgardRule::TwoTwoS => all_beyond(window, mean, 2.0 * sd),
        WestgardRule::RangeFourS => match window {
            [.., previous, latest] => (latest - previous).abs() > 4.0 * sd,
            _ => false,
        },
        WestgardRule::FourOneS => all_beyond(window, mean, sd),
        WestgardRule::TenX => all_beyond(window, mean, 0.0),
    }
}

/// 全部高于 mean + limit，或全部低于 mean - limit
fn all_beyond(window: &[f64], mean: f64, limit: f64) -> bool {
    if window.is_empty() {
        return false;
    }
    window.iter().all(|v| *v > mean + limit) || window.iter().all(|v| *v < mean - limit)
}
