use std::{fmt, path::PathBuf};

use futures::future::join_all;
use log::{error, info};

use crate::{
    api::metabase::{Dataset, DatasetSource, MetabaseClient},
    config::ReportConfig,
    error::ReportError,
    report::{
        render::ImageRenderer,
        table::{ascii_table, RenderedTable},
        template::{compose, load_template, ReportContext, ReportTime},
        writer::write_image,
        Warehouse,
    },
    utils::send_email::{notify, Email, Notifier},
};

/// Outcome of every warehouse of a run, in the configured order.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<(String, Result<PathBuf, ReportError>)>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ReportError)> {
        self.outcomes
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded(), self.failed())
    }
}

/// Log in to Metabase, then make the report of every warehouse.  Only a
/// failed login is returned as an error, warehouse failures end up in the
/// summary.
pub async fn run(
    config: &ReportConfig,
    renderer: &dyn ImageRenderer,
    notifier: Option<&dyn Notifier>,
) -> Result<RunSummary, ReportError> {
    let client = MetabaseClient::new(&config.base_url);
    let session = client.login(&config.username, &config.password).await?;
    Ok(run_report(config, &session, renderer, notifier).await)
}

/// All warehouses run concurrently on the current task.  One failing
/// warehouse doesn't stop or affect the others.
pub async fn run_report(
    config: &ReportConfig,
    source: &dyn DatasetSource,
    renderer: &dyn ImageRenderer,
    notifier: Option<&dyn Notifier>,
) -> RunSummary {
    info!("Making reports for {} warehouses", config.warehouses.len());
    let tasks = config.warehouses.iter().map(|warehouse| async move {
        let outcome = make_report(config, warehouse, source, renderer, notifier).await;
        match &outcome {
            Ok(path) => info!("{}: report written to {}", warehouse.name, path.display()),
            Err(e) => error!("{}: {}", warehouse.name, e),
        }
        (warehouse.name.clone(), outcome)
    });
    let summary = RunSummary {
        outcomes: join_all(tasks).await,
    };
    info!("Report run finished: {}", summary);
    summary
}

/// Fetch -> render -> compose -> rasterize -> write, and email if configured.
async fn make_report(
    config: &ReportConfig,
    warehouse: &Warehouse,
    source: &dyn DatasetSource,
    renderer: &dyn ImageRenderer,
    notifier: Option<&dyn Notifier>,
) -> Result<PathBuf, ReportError> {
    let query = config.query_for(warehouse);
    let dataset = source.fetch(warehouse, &query).await?;
    info!(
        "{}: {} columns, {} rows",
        warehouse.name,
        dataset.columns.len(),
        dataset.rows.len()
    );

    let time = ReportTime::now(&config.timezone)?;
    let context = ReportContext::new(warehouse, RenderedTable::from_dataset(&dataset), &time);
    let template = load_template(&config.template_path).await?;
    let html = compose(&template, &context);

    let image = renderer.render(&html).await?;
    let path = write_image(&config.output_dir, &warehouse.name, time.timestamp_ms, &image)?;

    if let Some(notifier) = notifier {
        notify(notifier, &report_email(&context, &dataset, html)).await;
    }
    Ok(path)
}

fn report_email(context: &ReportContext, dataset: &Dataset, html: String) -> Email {
    Email {
        subject: format!(
            "Warehouse report {} {} {}",
            context.branch_label, context.month, context.year
        ),
        text: ascii_table(dataset).to_string(),
        html,
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, error::Error, fs, path::Path, sync::Mutex, time::Duration};

    use futures::future::BoxFuture;
    use serde_json::{json, Value};
    use tokio::{sync::Barrier, time::timeout};

    use super::*;
    use crate::api::metabase::{Column, NativeQuery};

    const TEMPLATE: &str = r#"<html><head><title>__TOKO_CABANG__ __MONTH__ __YEAR__</title></head>
<body>
<h3>Toko Cabang __TOKO_CABANG__</h3>
<table><thead><tr>__TABLE_HEAD__</tr></thead><tbody>__TABLE_DATA__</tbody></table>
<p>Generated at __GENERATED_AT__</p>
</body></html>"#;

    /// Serves canned datasets, warehouses without one fail
    struct FakeSource {
        datasets: HashMap<String, Dataset>,
        queries: Mutex<Vec<(String, NativeQuery)>>,
    }

    impl FakeSource {
        fn new(datasets: &[(&str, Dataset)]) -> Self {
            FakeSource {
                datasets: datasets
                    .iter()
                    .map(|(name, ds)| (name.to_string(), ds.clone()))
                    .collect(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    impl DatasetSource for FakeSource {
        fn fetch<'a>(
            &'a self,
            warehouse: &'a Warehouse,
            query: &'a NativeQuery,
        ) -> BoxFuture<'a, Result<Dataset, ReportError>> {
            Box::pin(async move {
                self.queries
                    .lock()
                    .unwrap()
                    .push((warehouse.name.clone(), query.clone()));
                tokio::task::yield_now().await;
                self.datasets.get(&warehouse.name).cloned().ok_or_else(|| {
                    ReportError::Fetch(format!("{}: 500 Internal Server Error", warehouse.name))
                })
            })
        }
    }

    #[derive(Default)]
    struct FakeRenderer {
        pages: Mutex<Vec<String>>,
    }

    impl ImageRenderer for FakeRenderer {
        fn render<'a>(&'a self, html: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ReportError>> {
            Box::pin(async move {
                self.pages.lock().unwrap().push(html.to_string());
                Ok(b"\x89PNG fake".to_vec())
            })
        }
    }

    struct FailingRenderer;

    impl ImageRenderer for FailingRenderer {
        fn render<'a>(&'a self, _html: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ReportError>> {
            Box::pin(async { Err(ReportError::Render("chromium crashed".to_string())) })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Email>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn send<'a>(&'a self, email: &'a Email) -> BoxFuture<'a, Result<(), ReportError>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(email.clone());
                if self.fail {
                    Err(ReportError::Notify("quota exceeded".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn sales(values: &[Value]) -> Dataset {
        Dataset {
            columns: vec![Column {
                display_name: "warehouse_sales".to_string(),
            }],
            rows: values.iter().map(|v| vec![v.clone()]).collect(),
        }
    }

    fn config(dir: &Path, warehouses: &[&str]) -> Result<ReportConfig, Box<dyn Error>> {
        let template_path = dir.join("table.html");
        fs::write(&template_path, TEMPLATE)?;
        let output_dir = dir.join("image");
        fs::create_dir(&output_dir)?;
        Ok(ReportConfig {
            base_url: "http://localhost:3000".to_string(),
            username: "reporter".to_string(),
            password: "secret".to_string(),
            database: 2,
            query: "SELECT 1".to_string(),
            warehouses: warehouses.iter().map(|w| Warehouse::new(w)).collect(),
            template_path,
            output_dir,
            timezone: "Asia/Jakarta".to_string(),
            chrome_bin: "chromium".to_string(),
            screenshot_width: 1280,
            screenshot_height: 1024,
            notifier: None,
        })
    }

    #[tokio::test]
    async fn single_warehouse_end_to_end() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), &["pluit"])?;
        let source = FakeSource::new(&[("pluit", sales(&[json!(0.42)]))]);
        let renderer = FakeRenderer::default();

        let summary = run_report(&config, &source, &renderer, None).await;
        assert!(summary.is_success());
        assert_eq!(summary.to_string(), "1 succeeded, 0 failed");

        let pages = renderer.pages.lock().unwrap();
        assert_eq!(pages.len(), 1);
        let html = &pages[0];
        assert!(html.contains(r#"<th style="width: ">Warehouse Sales</th>"#));
        assert!(html.contains("<tr><td>42%</td></tr>"));
        assert!(html.contains("Toko Cabang Pluit"));
        assert!(!html.contains("__"));

        let path = summary.outcomes[0].1.as_ref().unwrap();
        assert_eq!(path.parent().unwrap(), config.output_dir);
        let file_name = path.file_name().unwrap().to_str().unwrap();
        let ts: i64 = file_name
            .strip_prefix("pluit_")
            .and_then(|s| s.strip_suffix(".png"))
            .unwrap()
            .parse()?;
        assert!(ts > 0);
        assert_eq!(fs::read(path)?, b"\x89PNG fake");
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_does_not_block_other_warehouses() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), &["bandung", "pluit", "medan"])?;
        // no dataset for bandung
        let source = FakeSource::new(&[
            ("pluit", sales(&[json!(0.42)])),
            ("medan", sales(&[Value::Null])),
        ]);
        let renderer = FakeRenderer::default();

        let summary = run_report(&config, &source, &renderer, None).await;
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());

        let names: Vec<&str> = summary.outcomes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["bandung", "pluit", "medan"]);
        let failures: Vec<_> = summary.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bandung");
        assert!(matches!(failures[0].1, ReportError::Fetch(_)));

        let files: Vec<String> = fs::read_dir(&config.output_dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<Result<_, _>>()?;
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.starts_with("pluit_")));
        assert!(files.iter().any(|f| f.starts_with("medan_")));
        Ok(())
    }

    /// Every fetch waits until all warehouses have started fetching
    struct BarrierSource {
        barrier: Barrier,
        inner: FakeSource,
    }

    impl DatasetSource for BarrierSource {
        fn fetch<'a>(
            &'a self,
            warehouse: &'a Warehouse,
            query: &'a NativeQuery,
        ) -> BoxFuture<'a, Result<Dataset, ReportError>> {
            Box::pin(async move {
                self.barrier.wait().await;
                self.inner.fetch(warehouse, query).await
            })
        }
    }

    #[tokio::test]
    async fn fetches_are_concurrent() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), &["pancoran", "bandung", "palembang"])?;
        let source = BarrierSource {
            barrier: Barrier::new(3),
            inner: FakeSource::new(&[
                ("pancoran", sales(&[json!(0.1)])),
                ("bandung", sales(&[json!(0.2)])),
            ]),
        };
        let renderer = FakeRenderer::default();

        let summary = timeout(
            Duration::from_secs(5),
            run_report(&config, &source, &renderer, None),
        )
        .await?;
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);

        let queries = source.inner.queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert!(queries
            .iter()
            .all(|(_, q)| q.query == "SELECT 1" && q.database == 2));
        Ok(())
    }

    #[tokio::test]
    async fn render_and_template_failures() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = config(dir.path(), &["pluit"])?;
        let source = FakeSource::new(&[("pluit", sales(&[json!(0.42)]))]);

        let summary = run_report(&config, &source, &FailingRenderer, None).await;
        assert!(matches!(summary.outcomes[0].1, Err(ReportError::Render(_))));

        config.template_path = dir.path().join("missing.html");
        let summary = run_report(&config, &source, &FakeRenderer::default(), None).await;
        assert!(matches!(summary.outcomes[0].1, Err(ReportError::Template { .. })));

        config.template_path = dir.path().join("table.html");
        config.output_dir = dir.path().join("not-there");
        let summary = run_report(&config, &source, &FakeRenderer::default(), None).await;
        assert!(matches!(summary.outcomes[0].1, Err(ReportError::Write { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn notifier_gets_report_and_failure_is_ignored() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), &["titip_aja_pancoran"])?;
        let source = FakeSource::new(&[("titip_aja_pancoran", sales(&[json!(0.873)]))]);
        let renderer = FakeRenderer::default();
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };

        let summary = run_report(&config, &source, &renderer, Some(&notifier)).await;
        assert!(summary.is_success());

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("Warehouse report Titip Aja Pancoran "));
        assert!(sent[0].text.contains("87%"));
        assert!(sent[0].html.contains("<td>87%</td>"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_login_aborts_run() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut config = config(dir.path(), &["pluit"])?;
        // nothing listens on port 9
        config.base_url = "http://127.0.0.1:9".to_string();
        let res = run(&config, &FakeRenderer::default(), None).await;
        assert!(matches!(res, Err(ReportError::Auth(_))));
        assert_eq!(fs::read_dir(&config.output_dir)?.count(), 0);
        Ok(())
    }
}
