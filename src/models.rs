//! Domain vocabulary shared by the registry, the store and the monitors.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Native publication frequency of a product
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "annual" | "yearly" => Ok(Frequency::Annual),
            _ => Err(Error::Registry(format!("Unknown frequency: {}", s))),
        }
    }
}

/// Political/territorial partition an observation belongs to.
///
/// Values from different regimes are never compared, merged or averaged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RegimeTag {
    AdenIrg,
    SanaaDefacto,
    Mixed,
    International,
}

impl RegimeTag {
    pub const ALL: [RegimeTag; 4] = [
        RegimeTag::AdenIrg,
        RegimeTag::SanaaDefacto,
        RegimeTag::Mixed,
        RegimeTag::International,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeTag::AdenIrg => "aden_irg",
            RegimeTag::SanaaDefacto => "sanaa_defacto",
            RegimeTag::Mixed => "mixed",
            RegimeTag::International => "international",
        }
    }
}

impl std::fmt::Display for RegimeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegimeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aden_irg" => Ok(RegimeTag::AdenIrg),
            "sanaa_defacto" => Ok(RegimeTag::SanaaDefacto),
            "mixed" => Ok(RegimeTag::Mixed),
            "international" => Ok(RegimeTag::International),
            _ => Err(Error::Registry(format!("Unknown regime tag: {}", s))),
        }
    }
}

/// Sector codebook used for coverage rollups
pub const SECTORS: &[&str] = &[
    "banking",
    "trade",
    "poverty",
    "macroeconomy",
    "prices",
    "currency",
    "public_finance",
    "energy",
    "food_security",
    "aid_flows",
    "labor_market",
    "conflict_economy",
    "infrastructure",
    "agriculture",
    "investment",
    "remittances",
    "sanctions",
    "humanitarian",
];

pub fn is_known_sector(sector: &str) -> bool {
    SECTORS.contains(&sector)
}
