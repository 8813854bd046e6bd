use crate::application::catalog::INDICATORS;
use crate::application::error::{ErrorReport, HttpError};
use crate::application::indicator::{PageData, Panel, PanelOutcome};
use crate::application::sources::{SourceState, SourceStatus};
use crate::domain::filters::{FilterSet, IndicatorOptions, MAX_TOP_N, MIN_TOP_N};
use crate::domain::indicators::{FilterParam, Indicator, IndicatorId};
use crate::domain::rows::{
    IndicatorRows, InterfaceHealth, InterfaceStatusRow, Table, interface_summary,
    monthly_totals, range_totals,
};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

pub const APP_TITLE: &str = "CONNEXA Monitor";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response() -> Response {
    let view = LayoutContext::new(NavigationView::for_page(None), None, NotFoundView::new())
        .with_title("Not found");
    let mut response = render_template_response(NotFoundTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Unknown indicator",
    )
    .attach(&mut response);
    response
}

#[derive(Clone)]
pub struct NavigationView {
    pub entries: Vec<NavigationLinkView>,
}

#[derive(Clone)]
pub struct NavigationLinkView {
    pub href: String,
    pub label: String,
    pub active: bool,
    pub stub: bool,
}

impl NavigationView {
    /// Overview link followed by one entry per catalog indicator.
    pub fn for_page(active: Option<IndicatorId>) -> Self {
        let mut entries = vec![NavigationLinkView {
            href: "/".to_string(),
            label: "Overview".to_string(),
            active: active.is_none(),
            stub: false,
        }];
        entries.extend(INDICATORS.iter().map(|indicator| NavigationLinkView {
            href: indicator_href(indicator.id),
            label: indicator.name.to_string(),
            active: active == Some(indicator.id),
            stub: indicator.is_stub(),
        }));
        Self { entries }
    }
}

/// Sidebar form bound to the session filter set.
///
/// Fields the current page does not read are posted back as hidden inputs so
/// the session keeps them for the other pages.
#[derive(Clone)]
pub struct FilterFormView {
    pub start: String,
    pub end: String,
    pub buyer: String,
    pub supplier: String,
    pub show_dates: bool,
    pub show_buyer: bool,
    pub show_supplier: bool,
    pub return_to: String,
    pub notice: Option<String>,
}

impl FilterFormView {
    pub fn new(
        filters: &FilterSet,
        params: &[FilterParam],
        notice: Option<String>,
        return_to: impl Into<String>,
    ) -> Self {
        Self {
            start: filters.start().to_string(),
            end: filters.end().to_string(),
            buyer: filters.buyer().map(|id| id.to_string()).unwrap_or_default(),
            supplier: filters
                .supplier()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            show_dates: params.contains(&FilterParam::DateRange),
            show_buyer: params.contains(&FilterParam::Buyer),
            show_supplier: params.contains(&FilterParam::Supplier),
            return_to: return_to.into(),
            notice,
        }
    }

    pub fn has_fields(&self) -> bool {
        self.show_dates || self.show_buyer || self.show_supplier
    }
}

pub struct LayoutContext<T> {
    pub title: String,
    pub navigation: NavigationView,
    pub filters: Option<FilterFormView>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(navigation: NavigationView, filters: Option<FilterFormView>, content: T) -> Self {
        Self {
            title: APP_TITLE.to_string(),
            navigation,
            filters,
            content,
        }
    }

    pub fn with_title(mut self, title: impl AsRef<str>) -> Self {
        self.title = format!("{} · {APP_TITLE}", title.as_ref());
        self
    }
}

pub struct OverviewView {
    pub indicators: Vec<IndicatorCardView>,
    pub sources: Vec<SourceStatusView>,
}

impl OverviewView {
    pub fn new(sources: &[SourceStatus]) -> Self {
        Self {
            indicators: INDICATORS.iter().map(IndicatorCardView::from).collect(),
            sources: sources.iter().map(SourceStatusView::from).collect(),
        }
    }
}

pub struct IndicatorCardView {
    pub href: String,
    pub name: String,
    pub description: String,
    pub status: &'static str,
    pub source: &'static str,
    pub stub: bool,
}

impl From<&Indicator> for IndicatorCardView {
    fn from(indicator: &Indicator) -> Self {
        Self {
            href: indicator_href(indicator.id),
            name: indicator.name.to_string(),
            description: indicator.description.to_string(),
            status: if indicator.is_stub() {
                "Pending SGM integration"
            } else {
                "Available"
            },
            source: indicator.source.label(),
            stub: indicator.is_stub(),
        }
    }
}

pub struct SourceStatusView {
    pub label: String,
    pub state: &'static str,
    pub detail: String,
    pub healthy: bool,
}

impl From<&SourceStatus> for SourceStatusView {
    fn from(status: &SourceStatus) -> Self {
        let state = match status.state {
            SourceState::Reachable => "Connected",
            SourceState::Unreachable => "Unreachable",
            SourceState::Configured => "Configured",
            SourceState::NotConfigured => "Not configured",
        };
        let detail = match (&status.database, &status.server_addr) {
            (Some(database), Some(addr)) => format!("{database} @ {addr}"),
            (Some(database), None) => database.clone(),
            _ => String::new(),
        };
        Self {
            label: status.label.to_string(),
            state,
            detail,
            healthy: status.is_healthy(),
        }
    }
}

#[derive(Template)]
#[template(path = "overview.html")]
pub struct OverviewTemplate {
    pub view: LayoutContext<OverviewView>,
}

pub struct IndicatorPageView {
    pub name: String,
    pub description: String,
    /// Names/top-N selector; only indicators over the OC views have one.
    pub has_options: bool,
    pub show_names: bool,
    pub top_n: u32,
    pub top_min: u32,
    pub top_max: u32,
    pub panels: Vec<PanelView>,
}

impl IndicatorPageView {
    pub fn new(data: &PageData) -> Self {
        Self {
            name: data.indicator.name.to_string(),
            description: data.indicator.description.to_string(),
            has_options: data.indicator.is_filtered(),
            show_names: data.options.show_names(),
            top_n: data.options.top_n(),
            top_min: MIN_TOP_N,
            top_max: MAX_TOP_N,
            panels: data.panels.iter().map(PanelView::from_panel).collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "indicator.html")]
pub struct IndicatorTemplate {
    pub view: LayoutContext<IndicatorPageView>,
}

impl IndicatorTemplate {
    /// Full page for a completed render cycle.
    pub fn from_page(data: PageData, return_to: impl Into<String>) -> Self {
        let content = IndicatorPageView::new(&data);
        let filters =
            FilterFormView::new(&data.filters, data.indicator.filters, data.notice, return_to);
        let view = LayoutContext::new(
            NavigationView::for_page(Some(data.indicator.id)),
            Some(filters),
            content,
        )
        .with_title(data.indicator.name);
        Self { view }
    }
}

/// Placeholder shown instead of data.
pub struct PanelNotice {
    /// `info`, `warning` or `error`; used as a CSS modifier.
    pub kind: &'static str,
    pub message: String,
}

pub struct MetricView {
    pub label: &'static str,
    pub value: String,
}

pub struct ChartView {
    pub title: String,
    pub bars: Vec<BarView>,
}

pub struct BarView {
    pub label: String,
    pub value: String,
    pub width_pct: u32,
}

pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<TableRowView>,
}

pub struct TableRowView {
    /// CSS class of the row; empty for plain rows.
    pub class: &'static str,
    pub cells: Vec<String>,
}

impl From<&Table> for TableView {
    fn from(table: &Table) -> Self {
        Self {
            columns: table.columns.iter().map(|column| column.to_string()).collect(),
            rows: table
                .rows
                .iter()
                .map(|row| TableRowView {
                    class: "",
                    cells: row.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}

impl TableView {
    /// Flag interface tables without a load stamp or past the lag threshold.
    fn highlight_interfaces(&mut self, rows: &[InterfaceStatusRow]) {
        for (view, row) in self.rows.iter_mut().zip(rows) {
            view.class = match row.health() {
                InterfaceHealth::Current => "",
                InterfaceHealth::Late => "late",
                InterfaceHealth::Missing => "missing",
            };
        }
    }
}

pub struct PanelView {
    pub title: String,
    pub anchor: &'static str,
    pub caption: Option<String>,
    pub notice: Option<PanelNotice>,
    pub metrics: Vec<MetricView>,
    pub charts: Vec<ChartView>,
    pub table: Option<TableView>,
    pub csv_href: String,
    pub json_href: String,
}

impl PanelView {
    pub fn from_panel(panel: &Panel) -> Self {
        let id = panel.indicator.id;
        let mut view = Self {
            title: panel.indicator.name.to_string(),
            anchor: id.slug(),
            caption: None,
            notice: None,
            metrics: Vec::new(),
            charts: Vec::new(),
            table: None,
            csv_href: format!("/indicators/{id}/export.csv{}", options_query(&panel.options)),
            json_href: format!("/api/indicators/{id}{}", options_query(&panel.options)),
        };

        match &panel.outcome {
            PanelOutcome::Ready(rows) if rows.is_empty() => {
                view.notice = Some(PanelNotice {
                    kind: "info",
                    message: "No data for the selected filters.".to_string(),
                });
            }
            PanelOutcome::Ready(rows) => view.fill(rows, panel.options),
            PanelOutcome::NotImplemented { guidance } => {
                view.notice = Some(PanelNotice {
                    kind: "info",
                    message: guidance.to_string(),
                });
            }
            PanelOutcome::Unavailable => {
                view.notice = Some(PanelNotice {
                    kind: "warning",
                    message: "Data unavailable: the data source could not be reached. \
                              Try again in a few minutes."
                        .to_string(),
                });
            }
            PanelOutcome::Failed => {
                view.notice = Some(PanelNotice {
                    kind: "error",
                    message: "This indicator could not be loaded.".to_string(),
                });
            }
        }

        view
    }

    pub fn has_data(&self) -> bool {
        self.table.is_some()
    }

    fn fill(&mut self, rows: &IndicatorRows, options: IndicatorOptions) {
        match rows {
            IndicatorRows::OcGeneradas(rows) => {
                let months = monthly_totals(rows);
                let totals = range_totals(&months);
                self.caption = Some(format!("{} aggregated rows", format_count(rows.len() as i64)));
                self.metrics = vec![
                    MetricView {
                        label: "OC (rango)",
                        value: format_count(totals.total_oc),
                    },
                    MetricView {
                        label: "Bultos (rango)",
                        value: format_amount(totals.total_bultos),
                    },
                ];
                self.charts = vec![
                    ChartView {
                        title: "OC per month".to_string(),
                        bars: bars(
                            months
                                .iter()
                                .map(|month| (month_label(month.mes), month.total_oc as f64)),
                            |value| format_count(value as i64),
                        ),
                    },
                    ChartView {
                        title: "Bultos per month".to_string(),
                        bars: bars(
                            months
                                .iter()
                                .map(|month| (month_label(month.mes), month.total_bultos)),
                            format_amount,
                        ),
                    },
                ];
            }
            IndicatorRows::Ranking(ranking) => {
                self.caption = Some(format!(
                    "Top {} buyers by generated OC",
                    options.top_n().min(ranking.len() as u32)
                ));
                self.charts = vec![ChartView {
                    title: "OC per buyer".to_string(),
                    bars: bars(
                        ranking
                            .iter()
                            .map(|row| (row.comprador.clone(), row.oc_total as f64)),
                        |value| format_count(value as i64),
                    ),
                }];
            }
            IndicatorRows::InterfaceStatus(interfaces) => {
                let summary = interface_summary(interfaces);
                self.caption = Some(format!(
                    "{} interface tables, last available day of each",
                    summary.tables
                ));
                self.metrics = vec![
                    MetricView {
                        label: "Tablas controladas",
                        value: format_count(summary.tables as i64),
                    },
                    MetricView {
                        label: "Con última fecha válida",
                        value: format_count(summary.with_date as i64),
                    },
                    MetricView {
                        label: "En alerta (atraso)",
                        value: format_count(summary.late as i64),
                    },
                    MetricView {
                        label: "Con error/columna faltante",
                        value: format_count(summary.with_error as i64),
                    },
                ];
            }
        }

        let mut table = TableView::from(&rows.to_table());
        if let IndicatorRows::InterfaceStatus(interfaces) = rows {
            table.highlight_interfaces(interfaces);
        }
        self.table = Some(table);
    }
}

pub struct NotFoundView {
    pub message: String,
}

impl NotFoundView {
    pub fn new() -> Self {
        Self {
            message: "The page you requested does not exist. Pick an indicator from the navigation."
                .to_string(),
        }
    }
}

impl Default for NotFoundView {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub view: LayoutContext<NotFoundView>,
}

pub fn indicator_href(id: IndicatorId) -> String {
    format!("/indicators/{id}")
}

fn options_query(options: &IndicatorOptions) -> String {
    format!("?names={}&top={}", options.show_names(), options.top_n())
}

fn month_label(month: time::Date) -> String {
    format!("{}-{:02}", month.year(), u8::from(month.month()))
}

fn bars(
    points: impl Iterator<Item = (String, f64)>,
    format: impl Fn(f64) -> String,
) -> Vec<BarView> {
    let points: Vec<(String, f64)> = points.collect();
    let max = points.iter().map(|(_, value)| *value).fold(0.0_f64, f64::max);
    points
        .into_iter()
        .map(|(label, value)| BarView {
            label,
            value: format(value),
            width_pct: bar_width(value, max),
        })
        .collect()
}

/// Bar length relative to the largest value, in whole percent.
pub fn bar_width(value: f64, max: f64) -> u32 {
    if max <= 0.0 || value <= 0.0 {
        return 0;
    }
    ((value / max) * 100.0).round().clamp(1.0, 100.0) as u32
}

pub fn format_count(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let grouped = group_thousands(&digits);
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

pub fn format_amount(value: f64) -> String {
    let rendered = format!("{:.2}", value.abs());
    let (whole, fraction) = rendered.split_once('.').unwrap_or((rendered.as_str(), "00"));
    let sign = if value < 0.0 && rendered != "0.00" {
        "-"
    } else {
        ""
    };
    format!("{sign}{}.{fraction}", group_thousands(whole))
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::PrimitiveDateTime;
    use time::macros::{date, datetime};

    use super::*;
    use crate::application::catalog::indicator;
    use crate::domain::rows::{OcGeneradaRow, RankingRow};

    fn panel(id: IndicatorId, outcome: PanelOutcome) -> Panel {
        Panel {
            indicator: indicator(id),
            options: IndicatorOptions::default(),
            outcome,
        }
    }

    #[test]
    fn counts_and_amounts_are_grouped() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1_234_567), "1,234,567");
        assert_eq!(format_count(-4_500), "-4,500");
        assert_eq!(format_amount(1234.5), "1,234.50");
        assert_eq!(format_amount(0.004), "0.00");
    }

    #[test]
    fn bar_widths_are_relative_to_the_maximum() {
        assert_eq!(bar_width(50.0, 200.0), 25);
        assert_eq!(bar_width(200.0, 200.0), 100);
        assert_eq!(bar_width(0.1, 1000.0), 1);
        assert_eq!(bar_width(3.0, 0.0), 0);
    }

    #[test]
    fn stub_panel_shows_guidance_without_data() {
        let view = PanelView::from_panel(&panel(
            IndicatorId::OcAprobadasSgm,
            PanelOutcome::NotImplemented {
                guidance: "requires SQL Server / tablas SGM",
            },
        ));
        let notice = view.notice.as_ref().expect("guidance notice");
        assert_eq!(notice.kind, "info");
        assert!(notice.message.contains("requires SQL Server / tablas SGM"));
        assert!(!view.has_data());
    }

    #[test]
    fn unavailable_panel_says_data_unavailable() {
        let view = PanelView::from_panel(&panel(IndicatorId::OcGeneradas, PanelOutcome::Unavailable));
        let notice = view.notice.as_ref().expect("placeholder");
        assert_eq!(notice.kind, "warning");
        assert!(notice.message.starts_with("Data unavailable"));
    }

    #[test]
    fn oc_panel_reports_range_metrics_and_monthly_bars() {
        let row = |mes, total_oc, total_bultos| OcGeneradaRow {
            mes,
            c_comprador: Some(1),
            n_comprador: Some("ANA".to_string()),
            c_proveedor: Some(2),
            n_proveedor: None,
            id_tienda: None,
            suc_nombre: None,
            total_oc,
            total_bultos,
        };
        let rows = IndicatorRows::OcGeneradas(vec![
            row(date!(2025 - 06 - 01), 1500, 10.0),
            row(date!(2025 - 07 - 01), 500, 2.5),
        ]);
        let view = PanelView::from_panel(&panel(
            IndicatorId::OcGeneradas,
            PanelOutcome::Ready(Arc::new(rows)),
        ));

        assert_eq!(view.metrics[0].label, "OC (rango)");
        assert_eq!(view.metrics[0].value, "2,000");
        assert_eq!(view.metrics[1].label, "Bultos (rango)");
        assert_eq!(view.metrics[1].value, "12.50");
        assert_eq!(view.charts[0].bars[0].label, "2025-06");
        assert_eq!(view.charts[0].bars[0].width_pct, 100);
        assert_eq!(view.charts[0].bars[1].width_pct, 33);
        assert!(view.has_data());
        assert_eq!(view.json_href, "/api/indicators/oc-generadas?names=true&top=20");
    }

    #[test]
    fn ranking_panel_charts_each_buyer() {
        let rows = IndicatorRows::Ranking(vec![
            RankingRow {
                comprador: "ANA".to_string(),
                oc_total: 40,
                bultos_total: 1.0,
            },
            RankingRow {
                comprador: "LUIS".to_string(),
                oc_total: 10,
                bultos_total: 0.5,
            },
        ]);
        let view = PanelView::from_panel(&panel(
            IndicatorId::RankingCompradores,
            PanelOutcome::Ready(Arc::new(rows)),
        ));
        assert_eq!(view.charts[0].bars.len(), 2);
        assert_eq!(view.charts[0].bars[1].width_pct, 25);
        assert_eq!(view.caption.as_deref(), Some("Top 2 buyers by generated OC"));
    }

    #[test]
    fn interface_panel_counts_and_flags_tables() {
        let row = |tabla: &str,
                   ultima_fecha: Option<PrimitiveDateTime>,
                   atraso_dias: Option<i64>,
                   error: Option<&str>| {
            InterfaceStatusRow {
                tabla: tabla.to_string(),
                campo_fecha: "fecha_extraccion".to_string(),
                ultima_fecha,
                cantidad: ultima_fecha.map(|_| 10),
                atraso_dias,
                error: error.map(str::to_string),
            }
        };
        let stamp = datetime!(2025 - 07 - 14 03:00:00);
        let rows = IndicatorRows::InterfaceStatus(vec![
            row("t050_articulos", Some(stamp), Some(1), None),
            row("t060_stock", Some(stamp), Some(3), None),
            row(
                "m_95_sensibles",
                None,
                None,
                Some("Columna src.m_95_sensibles.f_proc inexistente"),
            ),
        ]);
        let view = PanelView::from_panel(&panel(
            IndicatorId::ControlInterfaces,
            PanelOutcome::Ready(Arc::new(rows)),
        ));

        let metrics: Vec<_> = view
            .metrics
            .iter()
            .map(|metric| (metric.label, metric.value.as_str()))
            .collect();
        assert_eq!(
            metrics,
            vec![
                ("Tablas controladas", "3"),
                ("Con última fecha válida", "2"),
                ("En alerta (atraso)", "2"),
                ("Con error/columna faltante", "1"),
            ]
        );
        let table = view.table.as_ref().expect("table");
        let classes: Vec<_> = table.rows.iter().map(|row| row.class).collect();
        assert_eq!(classes, vec!["", "late", "missing"]);
        assert_eq!(table.rows[0].cells[2], "2025-07-14 03:00:00");
    }

    #[test]
    fn filter_form_shows_only_the_fields_an_indicator_reads() {
        let filters = FilterSet::month_to_date(date!(2025 - 07 - 15));

        let interfaces = indicator(IndicatorId::ControlInterfaces);
        let form = FilterFormView::new(&filters, interfaces.filters, None, "/");
        assert!(!form.has_fields());
        assert_eq!(form.start, "2025-07-01", "hidden values still round-trip");

        let sgm = indicator(IndicatorId::ProporcionCiSgm);
        let form = FilterFormView::new(&filters, sgm.filters, None, "/");
        assert!(form.show_dates);
        assert!(!form.show_buyer);
        assert!(!form.show_supplier);
    }

    #[test]
    fn navigation_marks_the_active_indicator() {
        let nav = NavigationView::for_page(Some(IndicatorId::RankingCompradores));
        assert_eq!(nav.entries.len(), 1 + INDICATORS.len());
        let active: Vec<_> = nav.entries.iter().filter(|entry| entry.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].href, "/indicators/ranking-compradores");
        assert!(nav.entries.iter().filter(|entry| entry.stub).count() == 3);
    }
}
