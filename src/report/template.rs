use std::path::Path;

use jiff::{Timestamp, Zoned};

use crate::{error::ReportError, report::table::RenderedTable, report::Warehouse};

pub const TABLE_HEAD: &str = "__TABLE_HEAD__";
pub const TABLE_DATA: &str = "__TABLE_DATA__";
pub const MONTH: &str = "__MONTH__";
pub const YEAR: &str = "__YEAR__";
pub const GENERATED_AT: &str = "__GENERATED_AT__";
pub const TOKO_CABANG: &str = "__TOKO_CABANG__";

/// Time fields of one report, all taken from the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportTime {
    /// e.g. `October`
    pub month: String,
    /// e.g. `2026`
    pub year: String,
    /// e.g. `Sunday, October 18, 2026 9:05 AM`
    pub generated_at: String,
    /// Unix epoch in milliseconds, only used to make file names unique
    pub timestamp_ms: i64,
}

impl ReportTime {
    pub fn now(tz: &str) -> Result<ReportTime, ReportError> {
        let zoned = Timestamp::now()
            .in_tz(tz)
            .map_err(|e| ReportError::Config(format!("time zone {}: {}", tz, e)))?;
        Ok(ReportTime::at(&zoned))
    }

    pub fn at(zoned: &Zoned) -> ReportTime {
        ReportTime {
            month: zoned.strftime("%B").to_string(),
            year: zoned.strftime("%Y").to_string(),
            generated_at: zoned.strftime("%A, %B %-d, %Y %-I:%M %p").to_string(),
            timestamp_ms: zoned.timestamp().as_millisecond(),
        }
    }
}

/// Values substituted into the HTML template for one warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    pub table_head: String,
    pub table_data: String,
    pub month: String,
    pub year: String,
    pub generated_at: String,
    pub branch_label: String,
}

impl ReportContext {
    pub fn new(warehouse: &Warehouse, table: RenderedTable, time: &ReportTime) -> Self {
        ReportContext {
            table_head: table.head,
            table_data: table.body,
            month: time.month.clone(),
            year: time.year.clone(),
            generated_at: time.generated_at.clone(),
            branch_label: warehouse.display_name(),
        }
    }
}

pub async fn load_template(path: &Path) -> Result<String, ReportError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ReportError::Template {
            path: path.to_path_buf(),
            source,
        })
}

/// Replace every occurrence of the six placeholders.  Values are inserted
/// verbatim, without any HTML escaping.
pub fn compose(template: &str, context: &ReportContext) -> String {
    template
        .replace(TABLE_HEAD, &context.table_head)
        .replace(TABLE_DATA, &context.table_data)
        .replace(MONTH, &context.month)
        .replace(YEAR, &context.year)
        .replace(GENERATED_AT, &context.generated_at)
        .replace(TOKO_CABANG, &context.branch_label)
}
