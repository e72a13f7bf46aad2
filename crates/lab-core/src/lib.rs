//! # LIS Core
//!
//! 实验室运营系统的核心模块，提供标本与质控的基础数据结构、错误定义、
//! 时钟抽象、标本类型目录和通用工具。

pub mod clock;
pub mod custody;
pub mod error;
pub mod models;
pub mod quality;
pub mod specimen_type;
pub mod utils;

pub use clock::{Clock, FixedClock, SystemClock};
pub use custody::{CustodyEvent, CustodyLog};
pub use error::{LabError, Result};
pub use models::*;
pub use quality::*;
pub use specimen_type::{SpecimenCatalog, SpecimenType, SpecimenTypeInfo, StandardCatalog};
