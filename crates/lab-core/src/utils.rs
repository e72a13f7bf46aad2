//! 通用工具函数

use crate::specimen_type::SpecimenType;
use chrono::NaiveDate;

/// 标本编号前缀：日期 + 类型代码，例如 "20261019-SER-"
pub fn specimen_number_prefix(date: NaiveDate, specimen_type: SpecimenType) -> String {
    format!("{}-{}-", date.format("%Y%m%d"), specimen_type.code())
}

/// 生成标本编号，序号为当日同类型的第几个标本
pub fn format_specimen_number(prefix: &str, sequence: u64) -> String {
    format!("{}{:04}", prefix, sequence)
}

/// 验证标本编号格式
pub fn is_valid_specimen_number(number: &str) -> bool {
    let mut parts = number.splitn(3, '-');
    let (Some(date), Some(code), Some(sequence)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
        && SpecimenType::from_code(code).is_ok()
        && sequence.len() >= 4
        && sequence.chars().all(|c| c.is_ascii_digit())
}
