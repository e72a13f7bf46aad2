//! 标本类型目录
//!
//! 每种标本类型的容器、最小/最适采集量和保存要求

use crate::error::{LabError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 标本类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecimenType {
    // 血液
    WholeBlood,
    Serum,
    Plasma,
    // 尿液
    RandomUrine,
    FirstMorningUrine,
    MidstreamUrine,
    TwentyFourHourUrine,
    // 体液
    CerebrospinalFluid,
    SynovialFluid,
    PleuralFluid,
    AsciticFluid,
    // 拭子
    ThroatSwab,
    NasalSwab,
    WoundSwab,
    VaginalSwab,
    // 其他
    Stool,
    Sputum,
    TissueBiopsy,
    Saliva,
    Hair,
    Nail,
}

/// 标本类型的静态要求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecimenTypeInfo {
    pub display_name: &'static str,
    pub code: &'static str,
    pub preferred_container: &'static str,
    pub minimum_volume: f64, // mL
    pub optimal_volume: f64, // mL
    pub requires_refrigeration: bool,
    pub requires_special_handling: bool,
    pub storage_temperature: &'static str,
    pub max_storage_duration: &'static str,
}

const REFRIGERATED: &str = "2-8°C";
const ROOM_TEMPERATURE: &str = "Room temperature";
const STANDARD_DURATION: &str = "Follow standard protocols";

macro_rules! type_info {
    ($name:expr, $code:expr, $container:expr, $min:expr, $opt:expr, $fridge:expr, $special:expr, $temp:expr, $duration:expr) => {
        SpecimenTypeInfo {
            display_name: $name,
            code: $code,
            preferred_container: $container,
            minimum_volume: $min,
            optimal_volume: $opt,
            requires_refrigeration: $fridge,
            requires_special_handling: $special,
            storage_temperature: $temp,
            max_storage_duration: $duration,
        }
    };
}

static WHOLE_BLOOD: SpecimenTypeInfo = type_info!("Whole Blood", "WB", "EDTA tube", 2.0, 5.0, true, false, REFRIGERATED, "24 hours");
static SERUM: SpecimenTypeInfo = type_info!("Serum", "SER", "Serum separator tube", 1.0, 3.0, true, false, REFRIGERATED, "7 days (refrigerated)");
static PLASMA: SpecimenTypeInfo = type_info!("Plasma", "PLA", "EDTA/Heparin tube", 1.0, 3.0, true, false, REFRIGERATED, "7 days (refrigerated)");
static RANDOM_URINE: SpecimenTypeInfo = type_info!("Random Urine", "RU", "Sterile container", 10.0, 50.0, false, false, ROOM_TEMPERATURE, "4 hours (room temp), 24 hours (refrigerated)");
static FIRST_MORNING_URINE: SpecimenTypeInfo = type_info!("First Morning Urine", "FMU", "Sterile container", 10.0, 50.0, false, false, ROOM_TEMPERATURE, "4 hours (room temp), 24 hours (refrigerated)");
static MIDSTREAM_URINE: SpecimenTypeInfo = type_info!("Midstream Urine", "MSU", "Sterile container", 10.0, 50.0, false, false, ROOM_TEMPERATURE, "4 hours (room temp), 24 hours (refrigerated)");
static TWENTY_FOUR_HOUR_URINE: SpecimenTypeInfo = type_info!("24-Hour Urine", "24HU", "Large container", 500.0, 3000.0, true, false, REFRIGERATED, "24 hours (with preservative)");
static CEREBROSPINAL_FLUID: SpecimenTypeInfo = type_info!("Cerebrospinal Fluid", "CSF", "Sterile tube", 0.5, 2.0, true, true, REFRIGERATED, "Immediate processing required");
static SYNOVIAL_FLUID: SpecimenTypeInfo = type_info!("Synovial Fluid", "SF", "Sterile tube", 0.5, 2.0, false, true, ROOM_TEMPERATURE, STANDARD_DURATION);
static PLEURAL_FLUID: SpecimenTypeInfo = type_info!("Pleural Fluid", "PF", "Sterile tube", 1.0, 5.0, false, true, ROOM_TEMPERATURE, STANDARD_DURATION);
static ASCITIC_FLUID: SpecimenTypeInfo = type_info!("Ascitic Fluid", "AF", "Sterile tube", 1.0, 5.0, false, true, ROOM_TEMPERATURE, STANDARD_DURATION);
static THROAT_SWAB: SpecimenTypeInfo = type_info!("Throat Swab", "TS", "Transport medium", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static NASAL_SWAB: SpecimenTypeInfo = type_info!("Nasal Swab", "NS", "Transport medium", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static WOUND_SWAB: SpecimenTypeInfo = type_info!("Wound Swab", "WS", "Transport medium", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static VAGINAL_SWAB: SpecimenTypeInfo = type_info!("Vaginal Swab", "VS", "Transport medium", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static STOOL: SpecimenTypeInfo = type_info!("Stool", "ST", "Stool container", 2.0, 10.0, false, false, ROOM_TEMPERATURE, "2 hours (room temp), 24 hours (refrigerated)");
static SPUTUM: SpecimenTypeInfo = type_info!("Sputum", "SP", "Sterile container", 2.0, 10.0, true, false, REFRIGERATED, "2 hours (room temp), 24 hours (refrigerated)");
static TISSUE_BIOPSY: SpecimenTypeInfo = type_info!("Tissue Biopsy", "TB", "Formalin container", 0.1, 5.0, false, true, "Room temperature (formalin)", "Indefinite (in formalin)");
static SALIVA: SpecimenTypeInfo = type_info!("Saliva", "SAL", "Sterile tube", 1.0, 5.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static HAIR: SpecimenTypeInfo = type_info!("Hair", "HR", "Envelope", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);
static NAIL: SpecimenTypeInfo = type_info!("Nail", "NL", "Envelope", 0.0, 0.0, false, false, ROOM_TEMPERATURE, STANDARD_DURATION);

impl SpecimenType {
    pub const ALL: [SpecimenType; 21] = [
        SpecimenType::WholeBlood,
        SpecimenType::Serum,
        SpecimenType::Plasma,
        SpecimenType::RandomUrine,
        SpecimenType::FirstMorningUrine,
        SpecimenType::MidstreamUrine,
        SpecimenType::TwentyFourHourUrine,
        SpecimenType::CerebrospinalFluid,
        SpecimenType::SynovialFluid,
        SpecimenType::PleuralFluid,
        SpecimenType::AsciticFluid,
        SpecimenType::ThroatSwab,
        SpecimenType::NasalSwab,
        SpecimenType::WoundSwab,
        SpecimenType::VaginalSwab,
        SpecimenType::Stool,
        SpecimenType::Sputum,
        SpecimenType::TissueBiopsy,
        SpecimenType::Saliva,
        SpecimenType::Hair,
        SpecimenType::Nail,
    ];

    /// 标准目录中的类型要求
    pub fn info(&self) -> &'static SpecimenTypeInfo {
        match self {
            SpecimenType::WholeBlood => &WHOLE_BLOOD,
            SpecimenType::Serum => &SERUM,
            SpecimenType::Plasma => &PLASMA,
            SpecimenType::RandomUrine => &RANDOM_URINE,
            SpecimenType::FirstMorningUrine => &FIRST_MORNING_URINE,
            SpecimenType::MidstreamUrine => &MIDSTREAM_URINE,
            SpecimenType::TwentyFourHourUrine => &TWENTY_FOUR_HOUR_URINE,
            SpecimenType::CerebrospinalFluid => &CEREBROSPINAL_FLUID,
            SpecimenType::SynovialFluid => &SYNOVIAL_FLUID,
            SpecimenType::PleuralFluid => &PLEURAL_FLUID,
            SpecimenType::AsciticFluid => &ASCITIC_FLUID,
            SpecimenType::ThroatSwab => &THROAT_SWAB,
            SpecimenType::NasalSwab => &NASAL_SWAB,
            SpecimenType::WoundSwab => &WOUND_SWAB,
            SpecimenType::VaginalSwab => &VAGINAL_SWAB,
            SpecimenType::Stool => &STOOL,
            SpecimenType::Sputum => &SPUTUM,
            SpecimenType::TissueBiopsy => &TISSUE_BIOPSY,
            SpecimenType::Saliva => &SALIVA,
            SpecimenType::Hair => &HAIR,
            SpecimenType::Nail => &NAIL,
        }
    }

    /// 标本编号中使用的类型代码
    pub fn code(&self) -> &'static str {
        self.info().code
    }

    /// 按代码查找类型，忽略大小写
    pub fn from_code(code: &str) -> Result<Self> {
        SpecimenType::ALL
            .into_iter()
            .find(|ty| ty.code().eq_ignore_ascii_case(code.trim()))
            .ok_or_else(|| LabError::Validation(format!("Unknown sample type code: {}", code)))
    }
}

impl fmt::Display for SpecimenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().display_name)
    }
}

/// 标本类型目录，验收质量关卡通过它获取最小采集量与冷藏要求
pub trait SpecimenCatalog: Send + Sync + std::fmt::Debug {
    fn lookup(&self, specimen_type: SpecimenType) -> SpecimenTypeInfo;
}

/// 内置标准目录
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCatalog;

impl SpecimenCatalog for StandardCatalog {
    fn lookup(&self, specimen_type: SpecimenType) -> SpecimenTypeInfo {
        specimen_type.info().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<&str> = SpecimenType::ALL.iter().map(|t| t.code()).collect();
        assert_eq!(codes.len(), SpecimenType::ALL.len());
    }

    #[test]
    fn test_from_code_ignores_case() {
        assert_eq!(SpecimenType::from_code("ser").unwrap(), SpecimenType::Serum);
        assert_eq!(SpecimenType::from_code("24hu").unwrap(), SpecimenType::TwentyFourHourUrine);
        assert!(SpecimenType::from_code("XYZ").is_err());
    }

    #[test]
    fn test_refrigeration_table() {
        let refrigerated: Vec<SpecimenType> = SpecimenType::ALL
            .into_iter()
            .filter(|t| t.info().requires_refrigeration)
            .collect();
        assert_eq!(
            refrigerated,
            vec![
                SpecimenType::WholeBlood,
                SpecimenType::Serum,
                SpecimenType::Plasma,
                SpecimenType::TwentyFourHourUrine,
                SpecimenType::CerebrospinalFluid,
                SpecimenType::Sputum,
            ]
        );
        assert_eq!(SpecimenType::Serum.info().storage_temperature, "2-8°C");
    }

    #[test]
    fn test_minimum_volumes() {
        assert_eq!(SpecimenType::WholeBlood.info().minimum_volume, 2.0);
        assert_eq!(StandardCatalog.lookup(SpecimenType::TwentyFourHourUrine).minimum_volume, 500.0);
        assert_eq!(SpecimenType::ThroatSwab.info().minimum_volume, 0.0);
    }
}
