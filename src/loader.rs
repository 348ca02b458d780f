//! loader.rs
//!
//! Startup ingestion of the flow-map CSV. The whole file is parsed before the
//! store is touched, then the table is replaced in a single transaction, so a
//! restart leaves `flow_map` in the same state instead of duplicating rows.

use std::fs::File;
use std::future::Future;
use std::io::Read;
use std::path::Path;

use chrono::Utc;
use csv::ReaderBuilder;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config::{FailurePolicy, StartupSettings};
use crate::errors::AppError;
use crate::flowmap::{FlowMapRecord, FlowMapStore};
use crate::metrics::FLOWMAP_ROWS_LOADED;

/// Parse flow-map records from CSV with a header row.
///
/// Any malformed row fails the whole read; the error carries the 1-based
/// line number of the offending record.
pub fn read_flowmap_csv<R: Read>(reader: R) -> Result<Vec<FlowMapRecord>, AppError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    for result in rdr.deserialize::<FlowMapRecord>() {
        let record = result.map_err(|source| AppError::Csv {
            line: source.position().map(|p| p.line()).unwrap_or(0),
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn read_flowmap_file(path: &Path) -> Result<Vec<FlowMapRecord>, AppError> {
    let file = File::open(path).map_err(|e| AppError::Io(path.display().to_string(), e))?;
    read_flowmap_csv(file)
}

/// Read `path` and replace the flow map with its rows. Returns rows written.
pub async fn load_flowmap<S>(store: &mut S, path: &Path) -> Result<u64, AppError>
where
    S: FlowMapStore + ?Sized,
{
    let records = read_flowmap_file(path)?;
    let written = store.replace_flowmap(&records, Utc::now()).await?;
    info!(path = %path.display(), rows = written, "Flow map loaded");
    Ok(written)
}

/// Run `attempt` until it succeeds. Under [`FailurePolicy::Retry`] an
/// unreachable store is retried every `retry_interval` with no upper bound; every
/// other failure is returned at once.
pub async fn retry_while_unavailable<T, F, Fut>(
    startup: &StartupSettings,
    mut attempt: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if startup.on_failure == FailurePolicy::Retry && e.is_store_unavailable() => {
                warn!(
                    attempt = attempts,
                    retry_in = ?startup.retry_interval,
                    error = %e,
                    "Waiting for PostgreSQL"
                );
                tokio::time::sleep(startup.retry_interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Startup gate: apply migrations to the primary store, then load the CSV.
/// Must finish before the API starts accepting requests.
pub async fn prepare_primary(
    pool: &PgPool,
    csv_path: &Path,
    startup: &StartupSettings,
) -> Result<u64, AppError> {
    let written = retry_while_unavailable(startup, move || async move {
        sqlx::migrate!("./migrations").run(pool).await?;
        let mut conn = pool.acquire().await?;
        load_flowmap(&mut *conn, csv_path).await
    })
    .await?;

    FLOWMAP_ROWS_LOADED.set(written as i64);
    info!("Connected to PostgreSQL");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowmap::tests::edge;
    use crate::industry::IndustryClass;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const HEADER: &str = "source_domain_code,source_domain_name,source_class_code,source_class_name,\
                          target_domain_code,target_domain_name,target_class_code,target_class_name\n";

    #[derive(Default)]
    struct MemoryFlowMap {
        rows: Vec<FlowMapRecord>,
        loaded_at: Option<DateTime<Utc>>,
        fail_with_io: bool,
    }

    #[async_trait]
    impl FlowMapStore for MemoryFlowMap {
        async fn list_flowmap_records(
            &mut self,
        ) -> Result<(Vec<FlowMapRecord>, Option<DateTime<Utc>>), AppError> {
            Ok((self.rows.clone(), self.loaded_at))
        }

        async fn list_flowmap_classes(&mut self) -> Result<Vec<IndustryClass>, AppError> {
            Ok(Vec::new())
        }

        async fn replace_flowmap(
            &mut self,
            records: &[FlowMapRecord],
            loaded_at: DateTime<Utc>,
        ) -> Result<u64, AppError> {
            if self.fail_with_io {
                let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "down");
                return Err(AppError::Db(sqlx::Error::Io(refused)));
            }
            self.rows = records.to_vec();
            self.loaded_at = Some(loaded_at);
            Ok(records.len() as u64)
        }
    }

    fn csv_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_every_row_verbatim() {
        let body = "1,Energy,11,Solar,2,Materials,21,Silicon\n\
                    2,Materials,21,Silicon,3, Chips ,31,Memory\n";
        let records = read_flowmap_csv(format!("{HEADER}{body}").as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_class_name, "Solar");
        assert_eq!(records[1].target_domain_name, "Chips");
        assert_eq!(records[1].target_class_code, 31);
    }

    #[test]
    fn a_bad_row_fails_the_whole_read_with_its_line() {
        let body = "1,Energy,11,Solar,2,Materials,21,Silicon\n\
                    1,Energy,not-a-number,Solar,2,Materials,21,Silicon\n";
        let err = read_flowmap_csv(format!("{HEADER}{body}").as_bytes()).unwrap_err();
        match err {
            AppError::Csv { line, .. } => assert_eq!(line, 3),
            other => panic!("expected CSV error, got {other:?}"),
        }
    }

    #[test]
    fn header_only_file_has_no_records() {
        assert!(read_flowmap_csv(HEADER.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_flowmap_file(Path::new("/nonexistent/mvc_map.csv")).unwrap_err();
        assert!(matches!(err, AppError::Io(..)));
    }

    #[tokio::test]
    async fn reloading_replaces_instead_of_duplicating() {
        let file = csv_file("1,Domain 1,11,Class 11,2,Domain 2,21,Class 21\n");
        let mut store = MemoryFlowMap::default();

        assert_eq!(tokio_test::assert_ok!(load_flowmap(&mut store, file.path()).await), 1);
        let (first, _) = store.list_flowmap_records().await.unwrap();

        assert_eq!(load_flowmap(&mut store, file.path()).await.unwrap(), 1);
        let (second, loaded_at) = store.list_flowmap_records().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, vec![edge((1, 11), (2, 21))]);
        assert!(loaded_at.is_some());
    }

    #[tokio::test]
    async fn parse_failure_leaves_existing_rows_untouched() {
        let mut store = MemoryFlowMap {
            rows: vec![edge((1, 11), (2, 21))],
            ..MemoryFlowMap::default()
        };
        let file = csv_file("1,Domain 1,eleven,Class 11,2,Domain 2,21,Class 21\n");

        tokio_test::assert_err!(load_flowmap(&mut store, file.path()).await);
        assert_eq!(store.rows, vec![edge((1, 11), (2, 21))]);
    }

    #[tokio::test]
    async fn unreachable_store_is_reported_as_unavailable() {
        let mut store = MemoryFlowMap {
            fail_with_io: true,
            ..MemoryFlowMap::default()
        };
        let file = csv_file("1,Domain 1,11,Class 11,2,Domain 2,21,Class 21\n");

        let err = load_flowmap(&mut store, file.path()).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }

    fn startup(on_failure: FailurePolicy) -> StartupSettings {
        StartupSettings {
            on_failure,
            retry_interval: Duration::from_millis(1),
        }
    }

    fn unavailable() -> AppError {
        AppError::Db(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn retry_policy_waits_for_the_store() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_while_unavailable(&startup(FailurePolicy::Retry), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(unavailable())
            } else {
                Ok(7u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn abort_policy_fails_on_first_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u64, _> = retry_while_unavailable(&startup(FailurePolicy::Abort), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_policy_does_not_retry_bad_data() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u64, _> = retry_while_unavailable(&startup(FailurePolicy::Retry), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Io("mvc_map.csv".into(), std::io::ErrorKind::NotFound.into()))
        })
        .await;

        assert!(matches!(result, Err(AppError::Io(..))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
