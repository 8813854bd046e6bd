//! Download formats for indicator tables.

use serde::Serialize;

use crate::domain::filters::{FilterSet, IndicatorOptions};
use crate::domain::indicators::IndicatorId;
use crate::domain::rows::{Cell, Table};

/// Render a table as RFC 4180 CSV with a header row and CRLF line endings.
pub fn table_to_csv(table: &Table) -> String {
    let mut out = String::new();
    push_record(&mut out, table.columns.iter().map(|column| column.to_string()));
    for row in &table.rows {
        push_record(&mut out, row.iter().map(Cell::to_string));
    }
    out
}

fn push_record(out: &mut String, fields: impl Iterator<Item = String>) {
    for (index, field) in fields.enumerate() {
        if index > 0 {
            out.push(',');
        }
        push_field(out, &field);
    }
    out.push_str("\r\n");
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

pub fn csv_filename(id: IndicatorId, filters: &FilterSet) -> String {
    format!("{id}_{}_{}.csv", filters.start(), filters.end())
}

#[derive(Debug, Serialize)]
pub struct FiltersPayload {
    pub start: String,
    pub end: String,
    pub buyer: Option<i64>,
    pub supplier: Option<i64>,
}

impl From<&FilterSet> for FiltersPayload {
    fn from(filters: &FilterSet) -> Self {
        Self {
            start: filters.start().to_string(),
            end: filters.end().to_string(),
            buyer: filters.buyer(),
            supplier: filters.supplier(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OptionsPayload {
    pub show_names: bool,
    pub top_n: u32,
}

/// JSON body of `/api/indicators/{slug}`. Field order is fixed so equal
/// inputs serialize to equal bytes.
#[derive(Debug, Serialize)]
pub struct IndicatorPayload<'a> {
    pub indicator: IndicatorId,
    pub filters: FiltersPayload,
    pub options: OptionsPayload,
    pub row_count: usize,
    pub columns: &'a [&'static str],
    pub rows: &'a [Vec<Cell>],
}

impl<'a> IndicatorPayload<'a> {
    pub fn new(
        indicator: IndicatorId,
        filters: &FilterSet,
        options: IndicatorOptions,
        table: &'a Table,
    ) -> Self {
        Self {
            indicator,
            filters: FiltersPayload::from(filters),
            options: OptionsPayload {
                show_names: options.show_names(),
                top_n: options.top_n(),
            },
            row_count: table.rows.len(),
            columns: &table.columns,
            rows: &table.rows,
        }
    }
}
