use crate::error::ArchiveError;
use crate::fetch::Fetcher;
use crate::records;
use crate::types::{file_name_for, DocumentSet, DownloadSummary, Failure, LinkEntry};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use url::Url;

/// Everything in the set that is saved as served, with its final path:
/// fixed pages, one field list per collection, then the files.
pub fn saved_files(docs: &DocumentSet) -> Result<Vec<LinkEntry>, ArchiveError> {
    let folder = PathBuf::from(&docs.folder);
    let mut entries = Vec::new();

    for page in &docs.pages {
        entries.push(placed(&page.url, PathBuf::from(&page.path))?);
    }
    for collection in &docs.collections {
        let name = file_name_for(&Url::parse(&collection.url)?);
        entries.push(placed(
            &collection.fields_url(),
            folder.join(format!("{}_fields.html", name)),
        )?);
    }
    for file in &docs.files {
        let name = file_name_for(&Url::parse(file)?);
        entries.push(placed(file, folder.join(name))?);
    }
    Ok(entries)
}

fn placed(url: &str, path: PathBuf) -> Result<LinkEntry, ArchiveError> {
    let entry = LinkEntry::new(Url::parse(url)?, None);
    Ok(LinkEntry {
        local_path: path,
        ..entry
    })
}

/// Saves the `Data` of each collection as `<folder>/<name>.json`. A collection
/// that cannot be fetched is recorded and skipped.
pub async fn archive_collections(
    fetcher: &dyn Fetcher,
    docs: &DocumentSet,
    dir: &Path,
    limit: Option<usize>,
) -> Result<DownloadSummary, ArchiveError> {
    let start_time = Instant::now();
    let mut summary = DownloadSummary::default();
    let folder = dir.join(&docs.folder);

    for collection in docs.collections.iter().take(limit.unwrap_or(usize::MAX)) {
        let url = Url::parse(&collection.url)?;
        let name = file_name_for(&url);
        summary.attempted += 1;

        let fetched =
            records::fetch_pages(fetcher, |page| collection.page_url(page), collection.paged)
                .await?;
        let (items, _) = match fetched {
            Ok(fetched) => fetched,
            Err(cause) => {
                warn!("Could not retrieve {} because of {}", url, cause);
                summary.failures.push(Failure {
                    target: url.to_string(),
                    cause,
                });
                continue;
            }
        };

        let path = folder.join(format!("{}.json", name));
        match records::write_records(&path, &items).await {
            Ok(bytes) => {
                info!("Saved {} records from {}", items.len(), url);
                summary.succeeded += 1;
                summary.bytes += bytes;
            }
            Err(cause) => summary.failures.push(Failure {
                target: url.to_string(),
                cause,
            }),
        }
    }

    summary.duration = start_time.elapsed();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureCause;
    use crate::fetch::stub::StubFetcher;
    use crate::types::{Collection, SavedPage};
    use serde_json::Value;
    use tempfile::TempDir;

    fn docs() -> DocumentSet {
        DocumentSet {
            url: "https://api.example.org/".into(),
            title: "Example API".into(),
            folder: "_CODEBOOKS".into(),
            pages: vec![
                SavedPage::new("https://api.example.org/rest/info/citation?f=html", "info_citation.html"),
                SavedPage::new("https://api.example.org/rest/data/fields", "_CODEBOOKS/data_fields.html"),
            ],
            collections: vec![
                Collection::single("https://api.example.org/rest/tags"),
                Collection::paged("https://api.example.org/rest/geometry"),
            ],
            files: vec!["https://www.example.org/pubs/pdf/Guide%20v2.pdf".into()],
        }
    }

    #[test]
    fn files_are_placed_under_the_folder() {
        let entries = saved_files(&docs()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.local_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("info_citation.html"),
                PathBuf::from("_CODEBOOKS/data_fields.html"),
                PathBuf::from("_CODEBOOKS/tags_fields.html"),
                PathBuf::from("_CODEBOOKS/geometry_fields.html"),
                PathBuf::from("_CODEBOOKS/Guide v2.pdf"),
            ]
        );
        assert_eq!(entries[2].url.as_str(), "https://api.example.org/rest/tags/fields");
    }

    #[tokio::test]
    async fn paged_collections_are_joined_and_failures_recorded() {
        let dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::new()
            .fail("https://api.example.org/rest/tags", FailureCause::Timeout)
            .serve(
                "https://api.example.org/rest/geometry?page=1",
                r#"{"Data": [{"g": 1}], "TotalPages": 2}"#,
            )
            .serve(
                "https://api.example.org/rest/geometry?page=2",
                r#"{"Data": [{"g": 2}], "TotalPages": 2}"#,
            );

        let summary = archive_collections(&fetcher, &docs(), dir.path(), None).await.unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failures[0].target, "https://api.example.org/rest/tags");
        let written = std::fs::read_to_string(dir.path().join("_CODEBOOKS/geometry.json")).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(!dir.path().join("_CODEBOOKS/tags.json").exists());
    }
}
