use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use sqlx::{
    FromRow, PgConnection, Postgres,
    postgres::{PgArguments, PgRow},
    query::QueryAs,
    query_as,
};
use time::{Date, PrimitiveDateTime};
use tracing::debug;

use crate::application::catalog::{QueryParam, ResolvedQuery};
use crate::application::repos::{KpiRepo, RepoError};
use crate::domain::rows::{
    IndicatorRows, InterfaceStatusRow, OcGeneradaRow, RankingRow, RowShape,
};

use super::{PostgresSources, map_sqlx_error};

#[derive(Debug, FromRow)]
struct OcGeneradaRecord {
    mes: Date,
    c_comprador: Option<i64>,
    n_comprador: Option<String>,
    c_proveedor: Option<i64>,
    n_proveedor: Option<String>,
    id_tienda: Option<String>,
    suc_nombre: Option<String>,
    total_oc: i64,
    total_bultos: f64,
}

impl From<OcGeneradaRecord> for OcGeneradaRow {
    fn from(record: OcGeneradaRecord) -> Self {
        Self {
            mes: record.mes,
            c_comprador: record.c_comprador,
            n_comprador: record.n_comprador,
            c_proveedor: record.c_proveedor,
            n_proveedor: record.n_proveedor,
            id_tienda: record.id_tienda,
            suc_nombre: record.suc_nombre,
            total_oc: record.total_oc,
            total_bultos: record.total_bultos,
        }
    }
}

#[derive(Debug, FromRow)]
struct RankingRecord {
    comprador: String,
    oc_total: i64,
    bultos_total: f64,
}

impl From<RankingRecord> for RankingRow {
    fn from(record: RankingRecord) -> Self {
        Self {
            comprador: record.comprador,
            oc_total: record.oc_total,
            bultos_total: record.bultos_total,
        }
    }
}

#[derive(Debug, FromRow)]
struct InterfaceStatusRecord {
    tabla: String,
    campo_fecha: String,
    ultima_fecha: Option<PrimitiveDateTime>,
    cantidad: Option<i64>,
    atraso_dias: Option<i64>,
    error: Option<String>,
}

impl From<InterfaceStatusRecord> for InterfaceStatusRow {
    fn from(record: InterfaceStatusRecord) -> Self {
        Self {
            tabla: record.tabla,
            campo_fecha: record.campo_fecha,
            ultima_fecha: record.ultima_fecha,
            cantidad: record.cantidad,
            atraso_dias: record.atraso_dias,
            error: record.error,
        }
    }
}

#[async_trait]
impl KpiRepo for PostgresSources {
    async fn fetch(&self, query: &ResolvedQuery) -> Result<IndicatorRows, RepoError> {
        let started = Instant::now();
        let mut conn = self.acquire(query.source).await?;

        let rows = match query.shape {
            RowShape::OcGeneradas => {
                IndicatorRows::OcGeneradas(fetch_rows::<OcGeneradaRecord, _>(&mut conn, query).await?)
            }
            RowShape::Ranking => {
                IndicatorRows::Ranking(fetch_rows::<RankingRecord, _>(&mut conn, query).await?)
            }
            RowShape::InterfaceStatus => IndicatorRows::InterfaceStatus(
                fetch_rows::<InterfaceStatusRecord, _>(&mut conn, query).await?,
            ),
        };

        let elapsed = started.elapsed();
        histogram!("connexa_monitor_query_ms", "indicator" => query.indicator.slug())
            .record(elapsed.as_secs_f64() * 1000.0);
        debug!(
            indicator = %query.indicator,
            rows = rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Indicator query completed"
        );

        Ok(rows)
    }
}

/// Decode every row as `R` and convert it into the domain row `O`.
async fn fetch_rows<R, O>(
    conn: &mut PgConnection,
    query: &ResolvedQuery,
) -> Result<Vec<O>, RepoError>
where
    R: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    O: From<R>,
{
    let records = typed_query::<R>(query)
        .fetch_all(conn)
        .await
        .map_err(|err| map_sqlx_error(query.source, err))?;
    Ok(records.into_iter().map(O::from).collect())
}

fn typed_query<'q, O>(query: &'q ResolvedQuery) -> QueryAs<'q, Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, PgRow>,
{
    query
        .params
        .iter()
        .fold(query_as::<_, O>(query.sql), |bound, param| match param {
            QueryParam::Date(value) => bound.bind(*value),
            QueryParam::OptionalInt(value) => bound.bind(*value),
            QueryParam::Int(value) => bound.bind(*value),
            QueryParam::TextArray(values) => bound.bind(*values),
        })
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    #[test]
    fn records_map_field_for_field() {
        let row = OcGeneradaRow::from(OcGeneradaRecord {
            mes: date!(2025 - 07 - 01),
            c_comprador: Some(14),
            n_comprador: Some("PEREZ, ANA".to_string()),
            c_proveedor: Some(3021),
            n_proveedor: None,
            id_tienda: Some("41".to_string()),
            suc_nombre: None,
            total_oc: 12,
            total_bultos: 340.5,
        });
        assert_eq!(row.mes, date!(2025 - 07 - 01));
        assert_eq!(row.n_comprador.as_deref(), Some("PEREZ, ANA"));
        assert_eq!(row.id_tienda.as_deref(), Some("41"));
        assert_eq!(row.total_oc, 12);

        let status = InterfaceStatusRow::from(InterfaceStatusRecord {
            tabla: "t060_stock".to_string(),
            campo_fecha: "fecha_extraccion".to_string(),
            ultima_fecha: Some(datetime!(2025 - 07 - 14 03:15:00)),
            cantidad: Some(98_211),
            atraso_dias: Some(1),
            error: None,
        });
        assert_eq!(status.tabla, "t060_stock");
        assert_eq!(status.cantidad, Some(98_211));
        assert_eq!(status.atraso_dias, Some(1));
    }
}
