use crate::error::ArchiveError;
use crate::types::Failure;
use log::info;
use std::path::{Path, PathBuf};

/// The second line of the metadata summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLine {
    Files(usize),
    DataFiles(usize),
    SeeSubfolders,
}

#[derive(Debug)]
pub struct Metadata<'a> {
    pub dataset: &'a str,
    pub attribution: &'a str,
    pub title: &'a str,
    pub url: &'a str,
    pub date: &'a str,
    pub count: CountLine,
}

impl Metadata<'_> {
    pub fn render(&self) -> String {
        let count = match self.count {
            CountLine::Files(n) => format!("{} files archived on {}", n, self.date),
            CountLine::DataFiles(n) => format!("{} data files archived on {}", n, self.date),
            CountLine::SeeSubfolders => format!(
                "See individual subfolders for number of files archived on {}",
                self.date
            ),
        };
        format!(
            "{}\n{}\nFrom webpage {}\nAt {}\nBy {}",
            self.dataset, count, self.title, self.url, self.attribution
        )
    }
}

pub fn webpage_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("_WEBPAGE-{}.html", date))
}

pub fn metadata_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("_METADATA-{}.txt", date))
}

pub fn errors_path(dir: &Path, date: &str) -> PathBuf {
    dir.join(format!("_ERRORS-{}.txt", date))
}

/// Saves the listing page exactly as received.
pub async fn write_webpage(dir: &Path, date: &str, page: &[u8]) -> Result<PathBuf, ArchiveError> {
    let path = webpage_path(dir, date);
    tokio::fs::write(&path, page).await?;
    Ok(path)
}

pub async fn write_metadata(dir: &Path, metadata: &Metadata<'_>) -> Result<PathBuf, ArchiveError> {
    let path = metadata_path(dir, metadata.date);
    tokio::fs::write(&path, metadata.render()).await?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// One `<target>: <cause>` line per failure, in order.
pub fn render_errors<'f>(failures: impl IntoIterator<Item = &'f Failure>) -> String {
    failures
        .into_iter()
        .map(|f| format!("{}: {}\n", f.target, f.cause))
        .collect()
}

/// Removes any stale error log, then writes a fresh one if there is anything to report.
pub async fn write_errors<'f>(
    dir: &Path,
    date: &str,
    failures: impl IntoIterator<Item = &'f Failure>,
) -> Result<Option<PathBuf>, ArchiveError> {
    let path = errors_path(dir, date);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => info!("Removed stale {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let text = render_errors(failures);
    if text.is_empty() {
        return Ok(None);
    }
    tokio::fs::write(&path, text).await?;
    info!("Wrote {}", path.display());
    Ok(Some(path))
}

/// Local and declared record counts for one record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCount {
    pub dataset: String,
    pub records: usize,
    pub declared: Option<u64>,
}

pub fn write_record_counts(dir: &Path, counts: &[RecordCount]) -> Result<PathBuf, ArchiveError> {
    let path = dir.join("_RECORD_COUNT.csv");
    let mut wtr = csv::WriterBuilder::new().from_path(&path)?;

    wtr.write_record(["Dataset", "Records", "Declared"])?;
    for count in counts {
        wtr.write_record([
            count.dataset.clone(),
            count.records.to_string(),
            count.declared.map(|d| d.to_string()).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(path)
}
