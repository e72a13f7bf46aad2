//! # 实验室系统管理模块
//!
//! 提供配置加载与验证、日志初始化

pub mod config;
pub mod logging;

pub use config::{
    ConfigManager, ConfigValidator, LabConfig, LogFormat, LoggingConfig, ReferenceStats, StoreConfig,
};
pub use logging::{build_filter, init_tracing};
