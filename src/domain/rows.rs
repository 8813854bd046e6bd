//! Typed result rows per indicator and the derived aggregates shown on the pages.

use std::{collections::BTreeMap, fmt};

use serde::{Serialize, Serializer};
use time::{Date, PrimitiveDateTime, macros::format_description};

/// Days behind the dashboard date after which an interface table is flagged.
pub const LAG_ALERT_DAYS: i64 = 1;

/// One aggregated row of the monthly OC generation view (month × buyer × supplier [× branch]).
#[derive(Debug, Clone, PartialEq)]
pub struct OcGeneradaRow {
    pub mes: Date,
    pub c_comprador: Option<i64>,
    pub n_comprador: Option<String>,
    pub c_proveedor: Option<i64>,
    pub n_proveedor: Option<String>,
    pub id_tienda: Option<String>,
    pub suc_nombre: Option<String>,
    pub total_oc: i64,
    pub total_bultos: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingRow {
    pub comprador: String,
    pub oc_total: i64,
    pub bultos_total: f64,
}

/// Freshness of one `src` interface table: its latest load stamp and how many
/// rows arrived on that last day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceStatusRow {
    pub tabla: String,
    pub campo_fecha: String,
    pub ultima_fecha: Option<PrimitiveDateTime>,
    pub cantidad: Option<i64>,
    /// Whole days between the last load and the dashboard date.
    pub atraso_dias: Option<i64>,
    /// Set when the table or its date column does not exist.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceHealth {
    Current,
    /// Last load is more than [`LAG_ALERT_DAYS`] old.
    Late,
    /// No load stamp at all.
    Missing,
}

impl InterfaceStatusRow {
    pub fn health(&self) -> InterfaceHealth {
        if self.ultima_fecha.is_none() {
            return InterfaceHealth::Missing;
        }
        match self.atraso_dias {
            Some(days) if days <= LAG_ALERT_DAYS => InterfaceHealth::Current,
            _ => InterfaceHealth::Late,
        }
    }
}

/// Headline counts of the interface control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceSummary {
    pub tables: usize,
    pub with_date: usize,
    /// Tables past the lag threshold, counting those without any date.
    pub late: usize,
    pub with_error: usize,
}

pub fn interface_summary(rows: &[InterfaceStatusRow]) -> InterfaceSummary {
    rows.iter().fold(
        InterfaceSummary {
            tables: rows.len(),
            ..InterfaceSummary::default()
        },
        |mut summary, row| {
            if row.ultima_fecha.is_some() {
                summary.with_date += 1;
            }
            if row.health() != InterfaceHealth::Current {
                summary.late += 1;
            }
            if row.error.is_some() {
                summary.with_error += 1;
            }
            summary
        },
    )
}

/// Row schema a resolved query is decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    OcGeneradas,
    Ranking,
    InterfaceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorRows {
    OcGeneradas(Vec<OcGeneradaRow>),
    Ranking(Vec<RankingRow>),
    InterfaceStatus(Vec<InterfaceStatusRow>),
}

impl IndicatorRows {
    pub fn len(&self) -> usize {
        match self {
            IndicatorRows::OcGeneradas(rows) => rows.len(),
            IndicatorRows::Ranking(rows) => rows.len(),
            IndicatorRows::InterfaceStatus(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_table(&self) -> Table {
        match self {
            IndicatorRows::OcGeneradas(rows) => Table {
                columns: vec![
                    "mes",
                    "c_comprador",
                    "n_comprador",
                    "c_proveedor",
                    "n_proveedor",
                    "id_tienda",
                    "suc_nombre",
                    "total_oc",
                    "total_bultos",
                ],
                rows: rows
                    .iter()
                    .map(|row| {
                        vec![
                            Cell::Date(row.mes),
                            Cell::from(row.c_comprador),
                            Cell::from(row.n_comprador.clone()),
                            Cell::from(row.c_proveedor),
                            Cell::from(row.n_proveedor.clone()),
                            Cell::from(row.id_tienda.clone()),
                            Cell::from(row.suc_nombre.clone()),
                            Cell::Int(row.total_oc),
                            Cell::Float(row.total_bultos),
                        ]
                    })
                    .collect(),
            },
            IndicatorRows::Ranking(rows) => Table {
                columns: vec!["comprador", "oc_total", "bultos_total"],
                rows: rows
                    .iter()
                    .map(|row| {
                        vec![
                            Cell::Text(row.comprador.clone()),
                            Cell::Int(row.oc_total),
                            Cell::Float(row.bultos_total),
                        ]
                    })
                    .collect(),
            },
            IndicatorRows::InterfaceStatus(rows) => Table {
                columns: vec![
                    "tabla",
                    "campo_fecha",
                    "ultima_fecha_extraccion",
                    "cantidad_registros",
                    "atraso_dias",
                    "error",
                ],
                rows: rows
                    .iter()
                    .map(|row| {
                        vec![
                            Cell::Text(row.tabla.clone()),
                            Cell::Text(row.campo_fecha.clone()),
                            row.ultima_fecha.map_or(Cell::Null, Cell::DateTime),
                            Cell::from(row.cantidad),
                            Cell::from(row.atraso_dias),
                            Cell::from(row.error.clone()),
                        ]
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(Date),
    DateTime(PrimitiveDateTime),
}

impl From<Option<i64>> for Cell {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Cell::Null, Cell::Int)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map_or(Cell::Null, Cell::Text)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(value) => f.write_str(value),
            Cell::Int(value) => write!(f, "{value}"),
            Cell::Float(value) => write!(f, "{value:.2}"),
            Cell::Date(value) => write!(f, "{value}"),
            Cell::DateTime(value) => {
                let rendered = value
                    .format(format_description!(
                        "[year]-[month]-[day] [hour]:[minute]:[second]"
                    ))
                    .map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Text(value) => serializer.serialize_str(value),
            Cell::Int(value) => serializer.serialize_i64(*value),
            Cell::Float(value) => serializer.serialize_f64(*value),
            Cell::Date(value) => serializer.collect_str(value),
            Cell::DateTime(_) => serializer.collect_str(self),
        }
    }
}

/// Column-ordered tabular view of a result, shared by HTML, CSV and JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthlyTotal {
    #[serde(serialize_with = "serialize_date")]
    pub mes: Date,
    pub total_oc: i64,
    pub total_bultos: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RangeTotals {
    pub total_oc: i64,
    pub total_bultos: f64,
}

fn serialize_date<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Sum `total_oc` and `total_bultos` per month, in month order.
pub fn monthly_totals(rows: &[OcGeneradaRow]) -> Vec<MonthlyTotal> {
    let mut by_month: BTreeMap<Date, (i64, f64)> = BTreeMap::new();
    for row in rows {
        let entry = by_month.entry(row.mes).or_insert((0, 0.0));
        entry.0 += row.total_oc;
        entry.1 += row.total_bultos;
    }

    by_month
        .into_iter()
        .map(|(mes, (total_oc, total_bultos))| MonthlyTotal {
            mes,
            total_oc,
            total_bultos,
        })
        .collect()
}

pub fn range_totals(months: &[MonthlyTotal]) -> RangeTotals {
    months.iter().fold(RangeTotals::default(), |acc, month| RangeTotals {
        total_oc: acc.total_oc + month.total_oc,
        total_bultos: acc.total_bultos + month.total_bultos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn row(mes: Date, comprador: i64, total_oc: i64, total_bultos: f64) -> OcGeneradaRow {
        OcGeneradaRow {
            mes,
            c_comprador: Some(comprador),
            n_comprador: None,
            c_proveedor: Some(1),
            n_proveedor: None,
            id_tienda: None,
            suc_nombre: None,
            total_oc,
            total_bultos,
        }
    }

    #[test]
    fn monthly_totals_group_and_sort_by_month() {
        let rows = vec![
            row(date!(2025 - 07 - 01), 3, 4, 10.5),
            row(date!(2025 - 06 - 01), 1, 2, 1.0),
            row(date!(2025 - 07 - 01), 2, 6, 0.5),
        ];

        let months = monthly_totals(&rows);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].mes, date!(2025 - 06 - 01));
        assert_eq!(months[0].total_oc, 2);
        assert_eq!(months[1].total_oc, 10);
        assert!((months[1].total_bultos - 11.0).abs() < f64::EPSILON);

        let totals = range_totals(&months);
        assert_eq!(totals.total_oc, 12);
        assert!((totals.total_bultos - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_rows_yield_zero_totals() {
        let months = monthly_totals(&[]);
        assert!(months.is_empty());
        assert_eq!(range_totals(&months), RangeTotals::default());
    }

    fn interface(
        tabla: &str,
        ultima_fecha: Option<PrimitiveDateTime>,
        atraso_dias: Option<i64>,
    ) -> InterfaceStatusRow {
        InterfaceStatusRow {
            tabla: tabla.to_string(),
            campo_fecha: "fecha_extraccion".to_string(),
            ultima_fecha,
            cantidad: ultima_fecha.map(|_| 120),
            atraso_dias,
            error: None,
        }
    }

    #[test]
    fn interface_health_follows_the_lag_threshold() {
        let stamp = datetime!(2025 - 07 - 14 03:15:00);
        assert_eq!(
            interface("t050_articulos", Some(stamp), Some(0)).health(),
            InterfaceHealth::Current
        );
        assert_eq!(
            interface("t050_articulos", Some(stamp), Some(1)).health(),
            InterfaceHealth::Current
        );
        assert_eq!(
            interface("t050_articulos", Some(stamp), Some(2)).health(),
            InterfaceHealth::Late
        );
        assert_eq!(
            interface("t050_articulos", None, None).health(),
            InterfaceHealth::Missing
        );
    }

    #[test]
    fn interface_summary_counts_missing_tables_as_late() {
        let stamp = datetime!(2025 - 07 - 14 03:15:00);
        let mut missing = interface("m_95_sensibles", None, None);
        missing.error = Some("Columna src.m_95_sensibles.f_proc inexistente".to_string());
        let rows = vec![
            interface("t050_articulos", Some(stamp), Some(1)),
            interface("t060_stock", Some(stamp), Some(4)),
            missing,
        ];

        assert_eq!(
            interface_summary(&rows),
            InterfaceSummary {
                tables: 3,
                with_date: 2,
                late: 2,
                with_error: 1,
            }
        );
    }

    #[test]
    fn interface_table_renders_load_stamps() {
        let rows = IndicatorRows::InterfaceStatus(vec![interface(
            "t060_stock",
            Some(datetime!(2025 - 07 - 14 03:15:09)),
            Some(1),
        )]);
        let table = rows.to_table();
        assert_eq!(table.rows[0][2].to_string(), "2025-07-14 03:15:09");
        assert_eq!(table.rows[0][3].to_string(), "120");
        assert_eq!(table.rows[0][5], Cell::Null);
        assert_eq!(
            serde_json::to_value(&table.rows[0][2]).expect("serializable"),
            serde_json::json!("2025-07-14 03:15:09")
        );
    }

    #[test]
    fn table_cells_render_nulls_as_blank() {
        let rows = IndicatorRows::OcGeneradas(vec![row(date!(2025 - 06 - 01), 7, 1, 2.0)]);
        let table = rows.to_table();
        assert_eq!(table.columns.len(), table.rows[0].len());
        assert_eq!(table.rows[0][0].to_string(), "2025-06-01");
        assert_eq!(table.rows[0][2].to_string(), "");
        assert_eq!(table.rows[0][8].to_string(), "2.00");
    }
}
