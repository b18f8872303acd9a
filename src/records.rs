use crate::error::{ArchiveError, FailureCause};
use crate::fetch::Fetcher;
use crate::report::RecordCount;
use crate::types::{DownloadSummary, Failure, Pause, RecordApi};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Instant;
use tokio::time::sleep;
use url::Url;

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(rename = "Data")]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DataPage {
    #[serde(rename = "Data")]
    data: Vec<Value>,
    #[serde(rename = "TotalPages", default)]
    total_pages: u64,
    #[serde(rename = "RecordCount", default)]
    record_count: Option<u64>,
}

#[derive(Debug, Default)]
pub struct RecordOutcome {
    pub summary: DownloadSummary,
    pub counts: Vec<RecordCount>,
    pub warnings: Vec<String>,
}

/// Ids of every collection the API lists. Failure here is fatal.
pub async fn list_ids(fetcher: &dyn Fetcher, api: &RecordApi) -> Result<Vec<String>, ArchiveError> {
    let url = Url::parse(&api.catalog_url)?;
    let body = fetcher
        .fetch_bytes(&url)
        .await
        .map_err(|cause| ArchiveError::Listing {
            url: url.to_string(),
            cause,
        })?;
    let catalog: CatalogPage = serde_json::from_slice(&body)?;
    let ids: Vec<String> = catalog
        .data
        .iter()
        .filter_map(|record| match record.get(&api.id_field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    info!("{} collections listed at {}", ids.len(), url);
    Ok(ids)
}

/// Pages through every id × breakdown and writes `<id>/<id>_<breakdown>.json`.
/// Count mismatches are warnings; failed collections are recorded and skipped.
pub async fn archive_records(
    fetcher: &dyn Fetcher,
    api: &RecordApi,
    ids: &[String],
    dir: &Path,
    pause: Option<Pause>,
) -> Result<RecordOutcome, ArchiveError> {
    let start_time = Instant::now();
    let mut outcome = RecordOutcome::default();

    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            if let Some(pause) = &pause {
                sleep(pause.pick()).await;
            }
        }
        for breakdown in &api.breakdowns {
            let label = format!("{} {}", id, breakdown);
            outcome.summary.attempted += 1;

            let page_url = |page: u64| {
                api.data_template
                    .replace("{id}", id)
                    .replace("{breakdown}", breakdown)
                    .replace("{page}", &page.to_string())
            };
            let (records, declared) = match fetch_pages(fetcher, page_url, true).await? {
                Ok(fetched) => fetched,
                Err(cause) => {
                    warn!("Could not retrieve {} because of {}", label, cause);
                    outcome.summary.failures.push(Failure { target: label, cause });
                    continue;
                }
            };

            let path = dir.join(id).join(format!("{}_{}.json", id, breakdown));
            match write_records(&path, &records).await {
                Ok(bytes) => {
                    outcome.summary.succeeded += 1;
                    outcome.summary.bytes += bytes;
                }
                Err(cause) => {
                    outcome.summary.failures.push(Failure { target: label, cause });
                    continue;
                }
            }

            match declared {
                Some(declared) if declared != records.len() as u64 => {
                    let msg = format!(
                        "MISMATCH in downloaded {} versus declared {} record count for {}",
                        records.len(),
                        declared,
                        label
                    );
                    warn!("{}", msg);
                    outcome.warnings.push(msg);
                }
                _ => info!("Downloaded {} records from {}", records.len(), label),
            }
            outcome.counts.push(RecordCount {
                dataset: label,
                records: records.len(),
                declared,
            });
        }
    }

    outcome.summary.duration = start_time.elapsed();
    Ok(outcome)
}

/// Collects `Data` from page 1 onwards, following `TotalPages` when `paged`.
/// The outer error is a broken descriptor; the inner one is a recoverable
/// fetch failure or an unexpected response shape.
pub(crate) async fn fetch_pages(
    fetcher: &dyn Fetcher,
    page_url: impl Fn(u64) -> String,
    paged: bool,
) -> Result<Result<(Vec<Value>, Option<u64>), FailureCause>, ArchiveError> {
    let mut records = Vec::new();
    let mut declared = None;
    let mut page = 1u64;

    loop {
        let url = Url::parse(&page_url(page))?;
        let body = match fetcher.fetch_bytes(&url).await {
            Ok(body) => body,
            Err(cause) => return Ok(Err(cause)),
        };
        let data: DataPage = match serde_json::from_slice(&body) {
            Ok(data) => data,
            Err(e) => return Ok(Err(FailureCause::Body(format!("unexpected JSON from {}: {}", url, e)))),
        };
        if page == 1 {
            declared = data.record_count;
        }
        records.extend(data.data);

        if paged && data.total_pages > page {
            page += 1;
        } else {
            break;
        }
    }

    Ok(Ok((records, declared)))
}

pub(crate) async fn write_records(path: &Path, records: &[Value]) -> Result<u64, FailureCause> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    records
        .serialize(&mut ser)
        .map_err(|e| FailureCause::Io(e.to_string()))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &buf).await?;
    Ok(buf.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::stub::StubFetcher;
    use tempfile::TempDir;

    fn api() -> RecordApi {
        RecordApi {
            url: "https://api.example.org/".into(),
            title: "Example API".into(),
            catalog_url: "https://api.example.org/surveys".into(),
            id_field: "SurveyId".into(),
            data_template: "https://api.example.org/data?surveyIds={id}&breakdown={breakdown}&page={page}"
                .into(),
            breakdowns: vec!["National".into(), "Subnational".into()],
        }
    }

    #[tokio::test]
    async fn ids_come_from_the_catalog() {
        let fetcher = StubFetcher::new().serve(
            "https://api.example.org/surveys",
            r#"{"Data": [{"SurveyId": "AF2015DHS"}, {"SurveyId": ""}, {"SurveyId": "AL2017DHS"}]}"#,
        );
        let ids = list_ids(&fetcher, &api()).await.unwrap();
        assert_eq!(ids, vec!["AF2015DHS", "AL2017DHS"]);
    }

    #[tokio::test]
    async fn pages_are_concatenated_and_mismatches_warned() {
        let dir = TempDir::new().unwrap();
        let base = "https://api.example.org/data?surveyIds=AF2015DHS";
        let fetcher = StubFetcher::new()
            .serve(
                &format!("{base}&breakdown=National&page=1"),
                r#"{"Data": [{"v": 1}, {"v": 2}], "TotalPages": 2, "RecordCount": 3}"#,
            )
            .serve(
                &format!("{base}&breakdown=National&page=2"),
                r#"{"Data": [{"v": 3}], "TotalPages": 2, "RecordCount": 3}"#,
            )
            .serve(
                &format!("{base}&breakdown=Subnational&page=1"),
                r#"{"Data": [{"v": 1}], "TotalPages": 1, "RecordCount": 5}"#,
            );

        let ids = vec!["AF2015DHS".to_string(), "ZZ1999DHS".to_string()];
        let outcome = archive_records(&fetcher, &api(), &ids, dir.path(), None)
            .await
            .unwrap();

        assert_eq!(outcome.summary.attempted, 4);
        assert_eq!(outcome.summary.succeeded, 2);
        assert_eq!(outcome.summary.failures.len(), 2);
        assert_eq!(outcome.summary.failures[0].target, "ZZ1999DHS National");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("AF2015DHS Subnational"));
        assert_eq!(outcome.counts[0].records, 3);
        assert_eq!(outcome.counts[0].declared, Some(3));

        let written = std::fs::read_to_string(dir.path().join("AF2015DHS/AF2015DHS_National.json")).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(written.contains("\n    {"));
    }
}
