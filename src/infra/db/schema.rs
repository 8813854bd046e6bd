//! Monitoring schema objects over the CONNEXA purchase-order table.
//!
//! Month buckets are computed in the dashboard calendar
//! ([`DASHBOARD_TIMEZONE`](crate::util::timezone::DASHBOARD_TIMEZONE)).

use sqlx::PgPool;
use tracing::info;

use crate::application::repos::RepoError;
use crate::domain::indicators::DataSource;

use super::map_sqlx_error;

const VIEW_OC_GENERADAS: &str = r#"
CREATE OR REPLACE VIEW mon.v_oc_generadas_mensual AS
WITH base AS (
    SELECT
        date_trunc('month', (t.f_alta_sist AT TIME ZONE 'America/Argentina/Buenos_Aires'))::date AS mes,
        t.c_comprador,
        t.c_proveedor,
        t.c_compra_kikker,
        COALESCE(t.q_bultos_kilos_diarco, 0::numeric) AS q_bultos
    FROM public.t080_oc_precarga_kikker t
    WHERE t.f_alta_sist IS NOT NULL
)
SELECT
    base.mes,
    base.c_comprador,
    base.c_proveedor,
    count(DISTINCT base.c_compra_kikker) AS total_oc,
    sum(base.q_bultos) AS total_bultos
FROM base
GROUP BY base.mes, base.c_comprador, base.c_proveedor
"#;

const VIEW_OC_GENERADAS_EXT: &str = r#"
CREATE OR REPLACE VIEW mon.v_oc_generadas_mensual_ext AS
SELECT
    v.mes,
    v.c_comprador,
    c.n_comprador,
    v.c_proveedor,
    v.total_oc,
    v.total_bultos
FROM mon.v_oc_generadas_mensual v
LEFT JOIN src.m_9_compradores c ON v.c_comprador = c.cod_comprador::numeric
"#;

const VIEW_OC_GENERADAS_SUCURSAL_EXT: &str = r#"
CREATE OR REPLACE VIEW mon.v_oc_generadas_mensual_sucursal_ext AS
WITH base AS (
    SELECT
        date_trunc('month', (t.f_alta_sist AT TIME ZONE 'America/Argentina/Buenos_Aires'))::date AS mes,
        t.c_comprador,
        t.c_proveedor,
        t.c_sucu_empr::varchar(10) AS id_tienda,
        t.c_compra_kikker,
        COALESCE(t.q_bultos_kilos_diarco, 0::numeric) AS q_bultos
    FROM public.t080_oc_precarga_kikker t
    WHERE t.f_alta_sist IS NOT NULL
)
SELECT
    b.mes,
    b.c_comprador,
    c.n_comprador,
    b.c_proveedor,
    trim(BOTH FROM p.n_proveedor) AS n_proveedor,
    b.id_tienda,
    s.suc_nombre,
    count(DISTINCT b.c_compra_kikker) AS total_oc,
    sum(b.q_bultos) AS total_bultos
FROM base b
LEFT JOIN src.m_9_compradores c
    ON b.c_comprador = COALESCE(NULLIF(c.cod_comprador::text, '')::numeric, 0::numeric)
LEFT JOIN src.m_10_proveedores p ON b.c_proveedor = p.c_proveedor::bigint::numeric
LEFT JOIN src.m_91_sucursales s ON b.id_tienda::text = s.id_tienda
GROUP BY b.mes, b.c_comprador, c.n_comprador, b.c_proveedor,
    trim(BOTH FROM p.n_proveedor), b.id_tienda, s.suc_nombre
"#;

/// Idempotent DDL, applied in order inside one transaction.
pub const MONITOR_OBJECTS: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS mon",
    VIEW_OC_GENERADAS,
    VIEW_OC_GENERADAS_EXT,
    VIEW_OC_GENERADAS_SUCURSAL_EXT,
    "CREATE INDEX IF NOT EXISTS idx_t080_alta_sist ON public.t080_oc_precarga_kikker (f_alta_sist)",
    "CREATE INDEX IF NOT EXISTS idx_t080_comprador ON public.t080_oc_precarga_kikker (c_comprador)",
    "CREATE INDEX IF NOT EXISTS idx_t080_proveedor ON public.t080_oc_precarga_kikker (c_proveedor)",
    "CREATE INDEX IF NOT EXISTS idx_t080_compra_kikker ON public.t080_oc_precarga_kikker (c_compra_kikker)",
    "CREATE INDEX IF NOT EXISTS idx_m9_cod_comprador ON src.m_9_compradores (cod_comprador)",
    "CREATE INDEX IF NOT EXISTS idx_m10_c_proveedor ON src.m_10_proveedores (c_proveedor)",
    "CREATE INDEX IF NOT EXISTS idx_m91_id_tienda ON src.m_91_sucursales (id_tienda)",
];

/// Create or refresh the `mon` views and their supporting indexes.
///
/// Requires CREATE privileges on `mon` and index rights on the source tables.
/// Returns the number of statements applied.
pub async fn ensure_monitor_objects(pool: &PgPool) -> Result<usize, RepoError> {
    let map_err = |err| map_sqlx_error(DataSource::Primary, err);

    let mut tx = pool.begin().await.map_err(map_err)?;
    for statement in MONITOR_OBJECTS {
        sqlx::raw_sql(statement)
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
    }
    tx.commit().await.map_err(map_err)?;

    info!(statements = MONITOR_OBJECTS.len(), "Monitoring objects ensured");
    Ok(MONITOR_OBJECTS.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::timezone::DASHBOARD_TIMEZONE;

    #[test]
    fn every_statement_is_idempotent() {
        for statement in MONITOR_OBJECTS {
            let statement = statement.trim_start();
            assert!(
                statement.starts_with("CREATE OR REPLACE VIEW")
                    || statement.contains("IF NOT EXISTS"),
                "not idempotent: {statement}"
            );
        }
    }

    #[test]
    fn base_view_is_created_before_dependents() {
        let position = |needle: &str| {
            MONITOR_OBJECTS
                .iter()
                .position(|statement| statement.contains(needle))
                .expect("statement present")
        };
        assert!(position("CREATE SCHEMA") < position("VIEW mon.v_oc_generadas_mensual AS"));
        assert!(
            position("VIEW mon.v_oc_generadas_mensual AS")
                < position("VIEW mon.v_oc_generadas_mensual_ext AS")
        );
    }

    #[test]
    fn month_buckets_use_the_dashboard_timezone() {
        let clause = format!("AT TIME ZONE '{}'", DASHBOARD_TIMEZONE.name());
        for view in [VIEW_OC_GENERADAS, VIEW_OC_GENERADAS_SUCURSAL_EXT] {
            assert!(view.contains(&clause));
        }
    }
}
