use std::{env, fs::File, path::PathBuf};

use jiff::tz::TimeZone;
use log::info;

use crate::{api::metabase::NativeQuery, error::ReportError, report::Warehouse};

pub const DEFAULT_DATABASE: i64 = 2;
pub const DEFAULT_TIMEZONE: &str = "Asia/Jakarta";
pub const DEFAULT_TEMPLATE: &str = "table.html";
pub const DEFAULT_OUTPUT_DIR: &str = "./image";

/// Change accordingly or add a new one.  The name must be the same as the
/// warehouse identifier in the Metabase tables.
pub fn default_warehouses() -> Vec<Warehouse> {
    ["pancoran", "bandung", "palembang", "medan", "pluit"]
        .iter()
        .map(|name| Warehouse::new(name))
        .collect()
}

/// OAuth2 credentials and addresses for the email notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
    pub refresh_token: String,
    /// The address registered with the OAuth2 client
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Everything a report run needs.  Built once at startup and only read after.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub database: i64,
    pub query: String,
    pub warehouses: Vec<Warehouse>,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
    pub timezone: String,
    pub chrome_bin: String,
    pub screenshot_width: u32,
    pub screenshot_height: u32,
    pub notifier: Option<NotifierConfig>,
}

impl ReportConfig {
    pub fn from_env() -> Result<ReportConfig, ReportError> {
        ReportConfig::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from a key lookup, empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<ReportConfig, ReportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| get(key).ok_or_else(|| ReportError::Config(format!("{} is not set", key)));

        let database = match get("METABASE_DATABASE") {
            Some(v) => parse_number(&v, "METABASE_DATABASE")?,
            None => DEFAULT_DATABASE,
        };

        let query = match (get("DATASET_QUERY"), get("DATASET_QUERY_FILE")) {
            (Some(q), _) => q,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .map_err(|e| ReportError::Config(format!("can't read query file {}: {}", path, e)))?,
            (None, None) => String::new(),
        };

        let warehouses = match get("WAREHOUSES_FILE") {
            Some(path) => read_warehouses(&path)?,
            None => default_warehouses(),
        };

        let timezone = get("REPORT_TZ").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        TimeZone::get(&timezone)
            .map_err(|e| ReportError::Config(format!("REPORT_TZ {}: {}", timezone, e)))?;

        let screenshot_width = match get("SCREENSHOT_WIDTH") {
            Some(v) => parse_number(&v, "SCREENSHOT_WIDTH")?,
            None => 1280,
        };
        let screenshot_height = match get("SCREENSHOT_HEIGHT") {
            Some(v) => parse_number(&v, "SCREENSHOT_HEIGHT")?,
            None => 1024,
        };

        let notifier = match (
            get("CLIENT_ID"),
            get("CLIENT_SECRET"),
            get("REFRESH_TOKEN"),
            get("EMAIL"),
            get("EMAIL_TO"),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token), Some(from), Some(to)) => {
                Some(NotifierConfig {
                    client_id,
                    client_secret,
                    redirect_uri: get("DIRECT_URI"),
                    refresh_token,
                    from,
                    to: split_addresses(&to),
                    cc: get("EMAIL_CC").map(|v| split_addresses(&v)).unwrap_or_default(),
                })
            }
            _ => None,
        };

        Ok(ReportConfig {
            base_url: required("BASE_URL")?,
            username: required("USERNAME")?,
            password: required("PASSWORD")?,
            database,
            query,
            warehouses,
            template_path: PathBuf::from(
                get("TEMPLATE_PATH").unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            ),
            output_dir: PathBuf::from(
                get("OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
            timezone,
            chrome_bin: get("CHROME_BIN").unwrap_or_else(|| "chromium".to_string()),
            screenshot_width,
            screenshot_height,
            notifier,
        })
    }

    /// The query for a warehouse, its own if it has one, the shared one otherwise.
    pub fn query_for(&self, warehouse: &Warehouse) -> NativeQuery {
        NativeQuery {
            database: self.database,
            query: warehouse
                .query
                .clone()
                .unwrap_or_else(|| self.query.clone()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ReportError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ReportError::Config(format!("{} is not a valid number: {}", key, value)))
}

fn split_addresses(s: &str) -> Vec<String> {
    s.split(',')
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect()
}

/// Read a JSON array of `{"name": ..., "query": ...}` objects
fn read_warehouses(path: &str) -> Result<Vec<Warehouse>, ReportError> {
    let file = File::open(path)
        .map_err(|e| ReportError::Config(format!("can't open warehouses file {}: {}", path, e)))?;
    let warehouses: Vec<Warehouse> = serde_json::from_reader(file)
        .map_err(|e| ReportError::Config(format!("invalid warehouses file {}: {}", path, e)))?;
    if warehouses.is_empty() {
        return Err(ReportError::Config(format!(
            "warehouses file {} has no warehouses",
            path
        )));
    }
    info!("Loaded {} warehouses from {}", warehouses.len(), path);
    Ok(warehouses)
}
