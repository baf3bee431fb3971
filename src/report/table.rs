use build_html::{Html, HtmlContainer, TableCell, TableCellType, TableRow};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use tabled::{builder::Builder, settings::Style};

use crate::api::metabase::{Column, Dataset};

/// Raw column name that gets a fixed width in the header
pub const WIDE_COLUMN: &str = "boe_category";

lazy_static! {
    static ref WORD_START: Regex = Regex::new(r"(^\w)|(\s+\w)").unwrap();
}

/// Markup for the `<thead>` and `<tbody>` of the report table.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTable {
    pub head: String,
    pub body: String,
}

impl RenderedTable {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        RenderedTable {
            head: render_head(&dataset.columns),
            body: render_body(&dataset.rows),
        }
    }
}

/// Uppercase the first character of the string and the first character
/// after each run of whitespace.
pub fn capitalize_words(s: &str) -> String {
    WORD_START
        .replace_all(s, |caps: &Captures| caps[0].to_uppercase())
        .into_owned()
}

/// `warehouse_sales` -> `Warehouse Sales`
pub fn column_label(column: &Column) -> String {
    capitalize_words(&column.display_name.replace('_', " "))
}

fn header_cell(column: &Column) -> TableCell {
    let width = if column.display_name == WIDE_COLUMN {
        "20%"
    } else {
        ""
    };
    let style = format!("width: {}", width);
    TableCell::new(TableCellType::Header)
        .with_attributes([("style", style.as_str())])
        .with_raw(column_label(column))
}

/// One `<th>` per column
pub fn render_head(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|column| header_cell(column).to_html_string())
        .join("")
}

/// One `<tr>` per row, one `<td>` per value
pub fn render_body(rows: &[Vec<Value>]) -> String {
    rows.iter()
        .map(|row| {
            let mut trow = TableRow::new();
            for value in row {
                trow.add_cell(TableCell::new(TableCellType::Data).with_raw(format_value(value)));
            }
            trow.to_html_string()
        })
        .join("")
}

/// Numbers are fractions shown as whole percentages, nulls become a dash,
/// everything else is shown as is.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(v) => format!("{}%", percent(v)),
            None => n.to_string(),
        },
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// halves round up, -0.005 gives 0% not -1%
fn percent(fraction: f64) -> String {
    let scaled = (fraction * 100.0 + 0.5).floor();
    if scaled >= i64::MIN as f64 && scaled < i64::MAX as f64 {
        (scaled as i64).to_string()
    } else {
        // float Display never switches to exponent notation
        scaled.to_string()
    }
}

/// Plain text version of the table, used as the text part of the email
pub fn ascii_table(dataset: &Dataset) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(dataset.columns.iter().map(column_label));
    for row in &dataset.rows {
        builder.push_record(row.iter().map(format_value));
    }
    let mut table = builder.build();
    table.with(Style::empty());
    table
}
