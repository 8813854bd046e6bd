//! Indicator identities and static metadata.

use std::{fmt, str::FromStr};

use serde::Serialize;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndicatorId {
    OcGeneradas,
    OcAprobadasSgm,
    ProporcionCiSgm,
    ProveedoresCi,
    RankingCompradores,
    ControlInterfaces,
}

impl IndicatorId {
    /// Navigation order.
    pub const ALL: [IndicatorId; 6] = [
        IndicatorId::OcGeneradas,
        IndicatorId::OcAprobadasSgm,
        IndicatorId::ProporcionCiSgm,
        IndicatorId::ProveedoresCi,
        IndicatorId::RankingCompradores,
        IndicatorId::ControlInterfaces,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            IndicatorId::OcGeneradas => "oc-generadas",
            IndicatorId::OcAprobadasSgm => "oc-aprobadas-sgm",
            IndicatorId::ProporcionCiSgm => "proporcion-ci-sgm",
            IndicatorId::ProveedoresCi => "proveedores-ci",
            IndicatorId::RankingCompradores => "ranking-compradores",
            IndicatorId::ControlInterfaces => "control-interfaces",
        }
    }
}

impl fmt::Display for IndicatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for IndicatorId {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        IndicatorId::ALL
            .into_iter()
            .find(|id| id.slug() == value)
            .ok_or_else(|| DomainError::not_found("indicator"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorStatus {
    Implemented,
    Stub,
}

/// Database an indicator reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// CONNEXA on PostgreSQL.
    Primary,
    /// SGM on SQL Server.
    Secondary,
}

impl DataSource {
    pub fn label(self) -> &'static str {
        match self {
            DataSource::Primary => "CONNEXA (PostgreSQL)",
            DataSource::Secondary => "SGM (SQL Server)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterParam {
    DateRange,
    Buyer,
    Supplier,
}

impl FilterParam {
    pub const ALL: [FilterParam; 3] = [
        FilterParam::DateRange,
        FilterParam::Buyer,
        FilterParam::Supplier,
    ];
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Indicator {
    pub id: IndicatorId,
    pub name: &'static str,
    pub description: &'static str,
    pub status: IndicatorStatus,
    pub source: DataSource,
    /// Session filters the indicator's query reads.
    pub filters: &'static [FilterParam],
}

impl Indicator {
    pub fn is_stub(&self) -> bool {
        matches!(self.status, IndicatorStatus::Stub)
    }

    /// Whether the session filters change this indicator's rows at all.
    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip_through_from_str() {
        for id in IndicatorId::ALL {
            assert_eq!(id.slug().parse::<IndicatorId>().expect("known slug"), id);
        }
    }

    #[test]
    fn unknown_slug_is_not_found() {
        let err = "oc-rechazadas".parse::<IndicatorId>().expect_err("unknown");
        assert!(matches!(err, DomainError::NotFound { entity: "indicator" }));
    }
}
