//! 实验室运营服务主程序

use anyhow::{Context, Result};
use clap::Parser;
use lab_admin::{init_tracing, ConfigManager};
use lab_core::SystemClock;
use lab_workflow::{LabEngine, LoggingReminderSink};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// 实验室运营服务命令行参数
#[derive(Parser, Debug)]
#[command(name = "lab-server")]
#[command(about = "实验室运营服务：标本生命周期与 Westgard 质控")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 打印生效的配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        manager
            .set_value("logging.level", level)
            .await
            .context("Invalid --log-level")?;
    }
    let config = manager.get_config().await;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // 初始化日志
    init_tracing(&config.logging)?;

    info!("启动实验室运营服务...");
    info!("  质量关卡温度范围: {}-{}°C", config.quality_gate.min_temperature, config.quality_gate.max_temperature);
    info!("  质控提醒间隔: {}s", config.scheduler.reminder_interval_secs);
    info!("  参考统计: {} 个测试定义", config.reference_stats.len());

    let engine = LabEngine::in_memory(
        Arc::new(config.reference_stats_source()),
        Arc::new(LoggingReminderSink),
        Arc::new(SystemClock),
        config.quality_gate.clone(),
        config.scheduler.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reminders = tokio::spawn(engine.scheduler().clone().run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("收到关闭信号，正在停止...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = reminders.await {
        error!("质控提醒任务异常退出: {}", e);
    }

    match engine.overview().await {
        Ok(overview) => info!(
            "服务已停止: {} 个质控定义, {} 个即将到期",
            overview.qc_definitions, overview.qc_due
        ),
        Err(e) => error!("生成概览失败: {}", e),
    }

    Ok(())
}
