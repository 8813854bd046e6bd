//! Indicator catalog: static metadata plus the parameterized query behind each indicator.

use thiserror::Error;
use time::Date;

use crate::domain::filters::{FilterSet, IndicatorOptions};
use crate::domain::indicators::{
    DataSource, FilterParam, Indicator, IndicatorId, IndicatorStatus,
};
use crate::domain::rows::RowShape;

const ALL_FILTERS: &[FilterParam] = &FilterParam::ALL;

const SGM_GUIDANCE: &str = "Not available yet: this indicator requires SQL Server / tablas SGM. \
     Configure SQLSERVER_HOST, SQLSERVER_DB, SQLSERVER_USER and SQLSERVER_PASSWORD, \
     then map the SGM order tables to CONNEXA purchase orders.";

/// `src` interface tables checked by the interface control, with the column
/// stamping each load. Both lists are bound as parallel arrays.
pub const INTERFACE_TABLES: &[&str] = &[
    "base_forecast_oc_demoradas",
    "base_productos_vigentes",
    "base_stock_sucursal",
    "base_transferencias_pendientes",
    "base_ventas_extendida",
    "m_3_articulos",
    "m_91_sucursales",
    "m_92_depositos",
    "m_93_sustitutos",
    "m_94_alternativos",
    "m_95_sensibles",
    "m_96_stock_seguridad",
    "t020_proveedor",
    "t020_proveedor_dias_entrega_cabe",
    "t020_proveedor_dias_entrega_deta",
    "t050_articulos",
    "t051_articulos_sucursal",
    "t052_articulos_proveedor",
    "t060_stock",
    "t080_oc_cabe",
    "t080_oc_pendientes",
    "t081_oc_deta",
    "t100_empresa_suc",
    "t114_rubros",
    "t117_compradores",
    "t702_est_vtas_por_articulo",
    "t702_est_vtas_por_articulo_dbarrio",
    "t710_estadis_oferta_folder",
    "t710_estadis_precios",
    "t710_estadis_reposicion",
];

pub const INTERFACE_DATE_COLUMNS: &[&str] = &[
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_procesado",
    "fecha_extraccion",
    "f_proc",
    "f_proc",
    "f_proc",
    "f_proc",
    "f_proc",
    "f_proc",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
    "f_venta",
    "f_venta",
    "fecha_extraccion",
    "fecha_extraccion",
    "fecha_extraccion",
];

pub static INDICATORS: [Indicator; 6] = [
    Indicator {
        id: IndicatorId::OcGeneradas,
        name: "OC generadas desde CONNEXA",
        description: "Purchase orders generated by CONNEXA per month, buyer and supplier.",
        status: IndicatorStatus::Implemented,
        source: DataSource::Primary,
        filters: ALL_FILTERS,
    },
    Indicator {
        id: IndicatorId::OcAprobadasSgm,
        name: "OC Aprobadas SGM",
        description: "CONNEXA purchase orders that reached SGM and were approved there.",
        status: IndicatorStatus::Stub,
        source: DataSource::Secondary,
        filters: ALL_FILTERS,
    },
    Indicator {
        id: IndicatorId::ProporcionCiSgm,
        name: "Proporción CI vs SGM",
        description: "Share of SGM purchase orders originated by the CONNEXA buying assistant.",
        status: IndicatorStatus::Stub,
        source: DataSource::Secondary,
        filters: &[FilterParam::DateRange],
    },
    Indicator {
        id: IndicatorId::ProveedoresCi,
        name: "Proveedores CI",
        description: "Suppliers restocked through the CONNEXA buying assistant.",
        status: IndicatorStatus::Stub,
        source: DataSource::Secondary,
        filters: &[FilterParam::DateRange, FilterParam::Supplier],
    },
    Indicator {
        id: IndicatorId::RankingCompradores,
        name: "Ranking de Compradores",
        description: "Buyers ranked by the number of purchase orders generated in CONNEXA.",
        status: IndicatorStatus::Implemented,
        source: DataSource::Primary,
        filters: ALL_FILTERS,
    },
    Indicator {
        id: IndicatorId::ControlInterfaces,
        name: "Control de Interfaces",
        description: "Last load day and row count of every `src` interface table feeding CONNEXA.",
        status: IndicatorStatus::Implemented,
        source: DataSource::Primary,
        filters: &[],
    },
];

pub fn indicator(id: IndicatorId) -> &'static Indicator {
    match id {
        IndicatorId::OcGeneradas => &INDICATORS[0],
        IndicatorId::OcAprobadasSgm => &INDICATORS[1],
        IndicatorId::ProporcionCiSgm => &INDICATORS[2],
        IndicatorId::ProveedoresCi => &INDICATORS[3],
        IndicatorId::RankingCompradores => &INDICATORS[4],
        IndicatorId::ControlInterfaces => &INDICATORS[5],
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("indicator `{indicator}` is not implemented")]
    NotImplemented {
        indicator: IndicatorId,
        guidance: &'static str,
    },
}

/// Positional query parameter, bound in order as `$1`, `$2`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryParam {
    Date(Date),
    OptionalInt(Option<i64>),
    Int(i64),
    TextArray(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub indicator: IndicatorId,
    pub source: DataSource,
    pub sql: &'static str,
    pub params: Vec<QueryParam>,
    pub shape: RowShape,
}

/// Map an indicator and the session filters to the query that produces its rows.
///
/// Parameters come only from the validated filter set and options. Stub
/// indicators fail with [`CatalogError::NotImplemented`] for every input.
pub fn resolve(
    id: IndicatorId,
    filters: &FilterSet,
    options: &IndicatorOptions,
) -> Result<ResolvedQuery, CatalogError> {
    let meta = indicator(id);
    if meta.is_stub() {
        return Err(CatalogError::NotImplemented {
            indicator: id,
            guidance: SGM_GUIDANCE,
        });
    }

    let filter_params = || {
        vec![
            QueryParam::Date(filters.start()),
            QueryParam::Date(filters.end()),
            QueryParam::OptionalInt(filters.buyer()),
            QueryParam::OptionalInt(filters.supplier()),
        ]
    };

    let (sql, params, shape) = match (id, options.show_names()) {
        (IndicatorId::OcGeneradas, false) => {
            (SQL_OC_GENERADAS, filter_params(), RowShape::OcGeneradas)
        }
        (IndicatorId::OcGeneradas, true) => {
            (SQL_OC_GENERADAS_NOMBRES, filter_params(), RowShape::OcGeneradas)
        }
        (IndicatorId::RankingCompradores, show_names) => {
            let mut params = filter_params();
            params.push(QueryParam::Int(i64::from(options.top_n())));
            let sql = if show_names {
                SQL_RANKING_COMPRADORES_NOMBRES
            } else {
                SQL_RANKING_COMPRADORES
            };
            (sql, params, RowShape::Ranking)
        }
        (IndicatorId::ControlInterfaces, _) => (
            SQL_CONTROL_INTERFACES,
            vec![
                QueryParam::TextArray(INTERFACE_TABLES),
                QueryParam::TextArray(INTERFACE_DATE_COLUMNS),
            ],
            RowShape::InterfaceStatus,
        ),
        _ => {
            return Err(CatalogError::NotImplemented {
                indicator: id,
                guidance: SGM_GUIDANCE,
            });
        }
    };

    Ok(ResolvedQuery {
        indicator: id,
        source: meta.source,
        sql,
        params,
        shape,
    })
}

const SQL_OC_GENERADAS: &str = r#"
SELECT
    mes,
    c_comprador::bigint AS c_comprador,
    NULL::text AS n_comprador,
    c_proveedor::bigint AS c_proveedor,
    NULL::text AS n_proveedor,
    NULL::text AS id_tienda,
    NULL::text AS suc_nombre,
    total_oc::bigint AS total_oc,
    COALESCE(total_bultos, 0)::float8 AS total_bultos
FROM mon.v_oc_generadas_mensual
WHERE mes >= $1 AND mes <= $2
  AND ($3::bigint IS NULL OR c_comprador = $3::bigint)
  AND ($4::bigint IS NULL OR c_proveedor = $4::bigint)
ORDER BY mes, c_comprador, c_proveedor
"#;

const SQL_OC_GENERADAS_NOMBRES: &str = r#"
SELECT
    mes,
    c_comprador::bigint AS c_comprador,
    n_comprador::text AS n_comprador,
    c_proveedor::bigint AS c_proveedor,
    n_proveedor::text AS n_proveedor,
    id_tienda::text AS id_tienda,
    suc_nombre::text AS suc_nombre,
    total_oc::bigint AS total_oc,
    COALESCE(total_bultos, 0)::float8 AS total_bultos
FROM mon.v_oc_generadas_mensual_sucursal_ext
WHERE mes >= $1 AND mes <= $2
  AND ($3::bigint IS NULL OR c_comprador = $3::bigint)
  AND ($4::bigint IS NULL OR c_proveedor = $4::bigint)
ORDER BY mes, n_comprador NULLS LAST, n_proveedor NULLS LAST, c_proveedor
"#;

const SQL_RANKING_COMPRADORES: &str = r#"
SELECT
    COALESCE(c_comprador::bigint::text, 's/d') AS comprador,
    SUM(total_oc)::bigint AS oc_total,
    COALESCE(SUM(total_bultos), 0)::float8 AS bultos_total
FROM mon.v_oc_generadas_mensual
WHERE mes >= $1 AND mes <= $2
  AND ($3::bigint IS NULL OR c_comprador = $3::bigint)
  AND ($4::bigint IS NULL OR c_proveedor = $4::bigint)
GROUP BY c_comprador
ORDER BY oc_total DESC NULLS LAST, comprador
LIMIT $5
"#;

const SQL_RANKING_COMPRADORES_NOMBRES: &str = r#"
SELECT
    COALESCE(n_comprador::text, c_comprador::bigint::text, 's/d') AS comprador,
    SUM(total_oc)::bigint AS oc_total,
    COALESCE(SUM(total_bultos), 0)::float8 AS bultos_total
FROM mon.v_oc_generadas_mensual_ext
WHERE mes >= $1 AND mes <= $2
  AND ($3::bigint IS NULL OR c_comprador = $3::bigint)
  AND ($4::bigint IS NULL OR c_proveedor = $4::bigint)
GROUP BY 1
ORDER BY oc_total DESC NULLS LAST, comprador
LIMIT $5
"#;

/// Per table: whether the date column exists, the latest stamp, the rows of
/// that last day and the lag against today in Buenos Aires. Table and column
/// names arrive as bound arrays and are quoted with `%I` before the per-table
/// statement runs through `query_to_xml`.
const SQL_CONTROL_INTERFACES: &str = r#"
WITH targets AS (
    SELECT t.tabla, t.campo_fecha
    FROM unnest($1::text[], $2::text[]) AS t(tabla, campo_fecha)
),
checked AS (
    SELECT
        tg.tabla,
        tg.campo_fecha,
        EXISTS (
            SELECT 1
            FROM information_schema.columns c
            WHERE c.table_schema = 'src'
              AND c.table_name = tg.tabla
              AND c.column_name = tg.campo_fecha
        ) AS presente
    FROM targets tg
),
measured AS (
    SELECT
        ch.tabla,
        ch.campo_fecha,
        ch.presente,
        CASE WHEN ch.presente THEN query_to_xml(
            format(
                'SELECT MAX(%1$I)::timestamp AS ultima_fecha, COUNT(*)::bigint AS cantidad '
                'FROM src.%2$I '
                'WHERE (%1$I)::date = (SELECT MAX((%1$I)::date) FROM src.%2$I)',
                ch.campo_fecha,
                ch.tabla
            ),
            false,
            true,
            ''
        ) END AS doc
    FROM checked ch
),
parsed AS (
    SELECT
        m.tabla,
        m.campo_fecha,
        m.presente,
        ((xpath('/row/ultima_fecha/text()', m.doc))[1]::text)::timestamp AS ultima_fecha,
        ((xpath('/row/cantidad/text()', m.doc))[1]::text)::bigint AS cantidad
    FROM measured m
)
SELECT
    p.tabla::text AS tabla,
    p.campo_fecha::text AS campo_fecha,
    p.ultima_fecha,
    p.cantidad,
    ((timezone('America/Argentina/Buenos_Aires', now()))::date - p.ultima_fecha::date)::bigint
        AS atraso_dias,
    CASE WHEN NOT p.presente
        THEN 'Columna src.' || p.tabla || '.' || p.campo_fecha || ' inexistente'
    END::text AS error
FROM parsed p
ORDER BY p.tabla
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn filters() -> FilterSet {
        FilterSet::new(date!(2025 - 06 - 01), date!(2025 - 06 - 30), Some(42), None)
            .expect("valid filters")
    }

    #[test]
    fn catalog_order_matches_identifiers() {
        for (meta, id) in INDICATORS.iter().zip(IndicatorId::ALL) {
            assert_eq!(meta.id, id);
            assert_eq!(indicator(id).id, id);
        }
    }

    #[test]
    fn stubs_never_resolve() {
        let ranges = [
            FilterSet::month_to_date(date!(2025 - 08 - 19)),
            filters(),
            FilterSet::new(date!(2020 - 01 - 01), date!(2030 - 12 - 31), None, Some(7))
                .expect("valid"),
        ];

        for meta in INDICATORS.iter().filter(|meta| meta.is_stub()) {
            for filters in &ranges {
                for options in [IndicatorOptions::default(), IndicatorOptions::new(false, 5)] {
                    let err = resolve(meta.id, filters, &options).expect_err("stub");
                    let CatalogError::NotImplemented { indicator, guidance } = err;
                    assert_eq!(indicator, meta.id);
                    assert!(guidance.contains("requires SQL Server / tablas SGM"));
                }
            }
        }
    }

    #[test]
    fn oc_generadas_binds_filters_in_order() {
        let query = resolve(
            IndicatorId::OcGeneradas,
            &filters(),
            &IndicatorOptions::new(false, 10),
        )
        .expect("implemented");

        assert_eq!(query.source, DataSource::Primary);
        assert_eq!(query.shape, RowShape::OcGeneradas);
        assert!(query.sql.contains("mon.v_oc_generadas_mensual\n"));
        assert_eq!(
            query.params,
            vec![
                QueryParam::Date(date!(2025 - 06 - 01)),
                QueryParam::Date(date!(2025 - 06 - 30)),
                QueryParam::OptionalInt(Some(42)),
                QueryParam::OptionalInt(None),
            ]
        );
    }

    #[test]
    fn show_names_switches_to_the_extended_view() {
        let query = resolve(
            IndicatorId::OcGeneradas,
            &filters(),
            &IndicatorOptions::default(),
        )
        .expect("implemented");
        assert!(query.sql.contains("mon.v_oc_generadas_mensual_sucursal_ext"));

        let ranking = resolve(
            IndicatorId::RankingCompradores,
            &filters(),
            &IndicatorOptions::default(),
        )
        .expect("implemented");
        assert!(ranking.sql.contains("mon.v_oc_generadas_mensual_ext"));
    }

    #[test]
    fn ranking_binds_top_n_last() {
        let query = resolve(
            IndicatorId::RankingCompradores,
            &filters(),
            &IndicatorOptions::new(false, 15),
        )
        .expect("implemented");

        assert_eq!(query.shape, RowShape::Ranking);
        assert_eq!(query.params.len(), 5);
        assert_eq!(query.params[4], QueryParam::Int(15));
        assert!(query.sql.contains("LIMIT $5"));
    }

    #[test]
    fn interface_control_ignores_session_filters() {
        let narrow = resolve(
            IndicatorId::ControlInterfaces,
            &filters(),
            &IndicatorOptions::default(),
        )
        .expect("implemented");
        let wide = resolve(
            IndicatorId::ControlInterfaces,
            &FilterSet::new(date!(2020 - 01 - 01), date!(2030 - 12 - 31), Some(1), Some(2))
                .expect("valid"),
            &IndicatorOptions::new(false, 5),
        )
        .expect("implemented");

        assert_eq!(narrow, wide);
        assert_eq!(narrow.shape, RowShape::InterfaceStatus);
        assert_eq!(
            narrow.params,
            vec![
                QueryParam::TextArray(INTERFACE_TABLES),
                QueryParam::TextArray(INTERFACE_DATE_COLUMNS),
            ]
        );
        assert!(!indicator(IndicatorId::ControlInterfaces).is_filtered());
    }

    #[test]
    fn interface_lists_pair_every_table_with_a_column() {
        assert_eq!(INTERFACE_TABLES.len(), INTERFACE_DATE_COLUMNS.len());
        let mut tables = INTERFACE_TABLES.to_vec();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), INTERFACE_TABLES.len(), "duplicate table");

        let column = |table: &str| {
            INTERFACE_TABLES
                .iter()
                .position(|candidate| *candidate == table)
                .map(|index| INTERFACE_DATE_COLUMNS[index])
        };
        assert_eq!(column("t060_stock"), Some("fecha_extraccion"));
        assert_eq!(column("m_91_sucursales"), Some("f_proc"));
        assert_eq!(column("t702_est_vtas_por_articulo"), Some("f_venta"));
        assert_eq!(column("base_ventas_extendida"), Some("fecha_procesado"));
    }

    #[test]
    fn interface_identifiers_are_quoted_not_concatenated() {
        assert!(SQL_CONTROL_INTERFACES.contains("src.%2$I"));
        assert!(SQL_CONTROL_INTERFACES.contains("MAX(%1$I)"));
        assert!(!SQL_CONTROL_INTERFACES.contains("%s"));
    }

    #[test]
    fn placeholders_cover_every_parameter() {
        for id in [IndicatorId::OcGeneradas, IndicatorId::RankingCompradores] {
            for show_names in [true, false] {
                let query = resolve(id, &filters(), &IndicatorOptions::new(show_names, 20))
                    .expect("implemented");
                for position in 1..=query.params.len() {
                    assert!(
                        query.sql.contains(&format!("${position}")),
                        "{id} is missing ${position}"
                    );
                }
                assert!(!query.sql.contains(&format!("${}", query.params.len() + 1)));
            }
        }
    }
}
