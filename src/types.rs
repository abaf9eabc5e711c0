//! Type-safe domain values for sequence steps
//!
//! Values written into steps travel as text (`observe:observeType = "FLAT"`),
//! but every place that reasons about them uses these enums so matching stays
//! exhaustive. `strum` supplies the text form in both directions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of exposure taken at a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ObserveType {
    #[default]
    Object,
    Dark,
    Bias,
    Flat,
    Arc,
    /// Generic calibration, used when no specific calibration could be mapped
    Cal,
}

impl ObserveType {
    /// Science exposures receive carried-forward object, exposure and coadds
    pub fn is_science(&self) -> bool {
        matches!(self, Self::Object)
    }
}

/// Observation class, which decides how time is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "camelCase")]
pub enum ObsClass {
    #[default]
    #[strum(serialize = "science")]
    Science,
    #[strum(serialize = "progCal")]
    ProgCal,
    #[strum(serialize = "partnerCal")]
    PartnerCal,
    #[strum(serialize = "acq")]
    Acq,
    #[strum(serialize = "acqCal")]
    AcqCal,
    #[strum(serialize = "dayCal")]
    DayCal,
}

impl ObsClass {
    /// Classes charged to the program carry the program's proprietary period
    pub fn is_chargeable(&self) -> bool {
        matches!(self, Self::Science | Self::ProgCal | Self::Acq)
    }
}

/// Calibration unit lamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Lamp {
    #[strum(serialize = "IRhigh")]
    IrGreyBodyHigh,
    #[strum(serialize = "IRlow")]
    IrGreyBodyLow,
    #[strum(serialize = "QH")]
    Quartz,
    #[strum(serialize = "Ar")]
    Argon,
    #[strum(serialize = "ThAr")]
    ThoriumArgon,
    #[strum(serialize = "CuAr")]
    CopperArgon,
    #[strum(serialize = "Xe")]
    Xenon,
}

impl Lamp {
    /// Arc lamps may be combined; flat lamps are used alone
    pub fn is_arc(&self) -> bool {
        matches!(
            self,
            Self::Argon | Self::ThoriumArgon | Self::CopperArgon | Self::Xenon
        )
    }
}

/// Calibration unit shutter position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Shutter {
    #[default]
    Open,
    Closed,
}

/// Calibration unit filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum CalFilter {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "ND1.0")]
    Nd10,
    #[strum(serialize = "ND2.0")]
    Nd20,
    #[strum(serialize = "ND3.0")]
    Nd30,
    #[strum(serialize = "ND4.0")]
    Nd40,
    #[strum(serialize = "ND5.0")]
    Nd50,
    #[strum(serialize = "GMOS balance")]
    GmosBalance,
    #[strum(serialize = "NIR blue")]
    NirBlue,
    #[strum(serialize = "Y")]
    Y,
    #[strum(serialize = "J")]
    J,
    #[strum(serialize = "H")]
    H,
    #[strum(serialize = "K")]
    K,
}

/// Calibration unit diffuser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Diffuser {
    #[default]
    #[strum(serialize = "IR")]
    Ir,
    #[strum(serialize = "visible")]
    Visible,
}

/// Baseline calibration set a calibration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum Basecal {
    Day,
    Night,
}

/// Which calibrations a calibration sequence node accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalibrationCategory {
    Flat,
    Arc,
    BasecalDay,
    BasecalNight,
}

/// Per-probe guiding setting written into steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GuideOption {
    Guide,
    Freeze,
    Park,
}

/// Execution status of a step's dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObsStatus {
    Ready,
    Complete,
    Skipped,
}

/// Detector read mode chosen from exposure time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    Bright,
    Medium,
    Faint,
}
