use crate::error::{ArchiveError, FailureCause};
use chrono::{DateTime, Local, NaiveDate};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Everything needed to archive one publisher. Authored once per source in
/// the catalog; never mutated by a run.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub key: &'static str,
    pub dataset: &'static str,
    pub attribution: &'static str,
    pub layout: SourceLayout,
    /// Applied between consecutive items: files in a fetch loop, surveys in a record API.
    pub pause: Option<Pause>,
}

impl SourceDescriptor {
    /// The URL shown in `list` and in the top-level metadata.
    pub fn landing_url(&self) -> &str {
        match &self.layout {
            SourceLayout::Single(section) => &section.url,
            SourceLayout::Sectioned { home, .. } => home,
            SourceLayout::Records(api) => &api.url,
            SourceLayout::Documents(docs) => &docs.url,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourceLayout {
    /// One listing page, files land directly in the run directory.
    Single(Section),
    /// A home page saved at the root, then one subfolder per section.
    Sectioned { home: String, sections: Vec<Section> },
    /// A paginated JSON API producing record files instead of linked downloads.
    Records(RecordApi),
    /// The documentation around a JSON API: fixed pages, files and collections.
    Documents(DocumentSet),
}

#[derive(Debug, Clone)]
pub struct Section {
    pub url: String,
    /// Used when the page has no usable `<title>`.
    pub title: Option<String>,
    pub subfolder: Option<String>,
    /// Empty means the page is only snapshotted.
    pub rules: Vec<LinkRule>,
    /// Place each entry under `<partition>/` instead of the section root.
    pub partition_folders: bool,
}

impl Section {
    pub fn page(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            subfolder: None,
            rules: Vec::new(),
            partition_folders: false,
        }
    }

    /// Mirrors the site: `.../Depth_Rasters/index.html` goes to `Depth_Rasters/`.
    pub fn in_own_folder(mut self) -> Self {
        let trimmed = self.url.trim_end_matches('/');
        let parent = trimmed.rsplit('/').nth(1).unwrap_or("section");
        self.subfolder = Some(parent.to_string());
        self
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_rule(mut self, rule: LinkRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn partition_folders(mut self) -> Self {
        self.partition_folders = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum LinkRule {
    /// Anchors inside a container of the section page.
    Anchors(AnchorRule),
    /// A newline-delimited text file of URLs.
    Manifest { url: String },
    /// One manifest per partition key; every `{}` in the template is replaced by the key.
    Partitioned {
        template: String,
        partitions: Vec<String>,
    },
    /// A JSON API listing shaped `{"Data": [{..}, ..]}`.
    JsonIndex {
        url: String,
        link_field: String,
        partition_field: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AnchorRule {
    pub container: String,
    pub filter: LinkFilter,
    /// Relative hrefs resolve against this; defaults to the page URL.
    pub base: Option<String>,
    pub follow: Option<FollowRule>,
}

impl AnchorRule {
    pub fn new(container: &str, filter: LinkFilter) -> Self {
        Self {
            container: container.to_string(),
            filter,
            base: None,
            follow: None,
        }
    }

    pub fn based_at(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    pub fn following(mut self, prefix: &str, container: &str) -> Self {
        self.follow = Some(FollowRule {
            prefix: prefix.to_string(),
            container: container.to_string(),
        });
        self
    }
}

/// Links whose href starts with `prefix` are secondary pages; every anchor
/// inside `container` on them is archived.
#[derive(Debug, Clone)]
pub struct FollowRule {
    pub prefix: String,
    pub container: String,
}

/// Matches on the raw href. Empty include lists accept everything.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub suffixes: Vec<String>,
    pub prefixes: Vec<String>,
    pub exclude_prefixes: Vec<String>,
}

impl LinkFilter {
    pub fn suffixes(suffixes: &[&str]) -> Self {
        Self {
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn prefixes(prefixes: &[&str]) -> Self {
        Self {
            prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Also requires one of `suffixes`.
    pub fn ending_with(mut self, suffixes: &[&str]) -> Self {
        self.suffixes = suffixes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn excluding(prefixes: &[&str]) -> Self {
        Self {
            exclude_prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn matches(&self, href: &str) -> bool {
        let lower = href.to_ascii_lowercase();
        let suffix_ok = self.suffixes.is_empty()
            || self
                .suffixes
                .iter()
                .any(|s| lower.ends_with(&s.to_ascii_lowercase()));
        let prefix_ok =
            self.prefixes.is_empty() || self.prefixes.iter().any(|p| href.starts_with(p.as_str()));
        let excluded = self
            .exclude_prefixes
            .iter()
            .any(|p| href.starts_with(p.as_str()));
        suffix_ok && prefix_ok && !excluded
    }
}

#[derive(Debug, Clone)]
pub struct RecordApi {
    /// Shown in the metadata summary.
    pub url: String,
    pub title: String,
    /// Lists the record collections, shaped `{"Data": [{id_field: ..}, ..]}`.
    pub catalog_url: String,
    pub id_field: String,
    /// `{id}`, `{breakdown}` and `{page}` are substituted.
    pub data_template: String,
    pub breakdowns: Vec<String>,
}

/// Documentation published next to a JSON API. The intro page is the run's
/// webpage snapshot; everything else lands under `folder` unless a page says
/// otherwise.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    pub url: String,
    pub title: String,
    pub folder: String,
    /// Saved byte for byte at a path relative to the run directory.
    pub pages: Vec<SavedPage>,
    pub collections: Vec<Collection>,
    /// Saved under `folder` with their URL names.
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SavedPage {
    pub url: String,
    pub path: String,
}

impl SavedPage {
    pub fn new(url: &str, path: &str) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_string(),
        }
    }
}

/// A JSON collection. Its `Data` is saved as `<name>.json` and its field list,
/// served at `<url>/fields`, as `<name>_fields.html`.
#[derive(Debug, Clone)]
pub struct Collection {
    pub url: String,
    /// Follow `TotalPages` with `?page=N`; otherwise the first response is all of it.
    pub paged: bool,
}

impl Collection {
    pub fn single(url: &str) -> Self {
        Self {
            url: url.to_string(),
            paged: false,
        }
    }

    pub fn paged(url: &str) -> Self {
        Self {
            url: url.to_string(),
            paged: true,
        }
    }

    pub fn page_url(&self, page: u64) -> String {
        if self.paged {
            format!("{}?page={}", self.url, page)
        } else {
            self.url.clone()
        }
    }

    pub fn fields_url(&self) -> String {
        format!("{}/fields", self.url.trim_end_matches('/'))
    }
}

/// A randomised wait between `min` and `max`.
#[derive(Debug, Clone, Copy)]
pub struct Pause {
    pub min: Duration,
    pub max: Duration,
}

impl Pause {
    #[cfg(test)]
    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    pub fn between_secs(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_secs(min),
            max: Duration::from_secs(max),
        }
    }

    pub fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let (min, max) = (self.min.as_millis() as u64, self.max.as_millis() as u64);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub url: Url,
    /// Last path segment of the URL.
    pub name: String,
    pub partition: Option<String>,
    /// Relative to the section directory; unique within a run.
    pub local_path: PathBuf,
}

impl LinkEntry {
    pub fn new(url: Url, partition: Option<String>) -> Self {
        let name = file_name_for(&url);
        Self {
            local_path: PathBuf::from(&name),
            url,
            name,
            partition,
        }
    }
}

/// Last non-empty path segment, percent-decoded, with path separators removed.
pub fn file_name_for(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let cleaned = decoded.replace(['/', '\\'], "_");
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        url.host_str().unwrap_or("index").to_string() + ".html"
    } else {
        cleaned
    }
}

#[derive(Debug)]
pub struct DownloadResult {
    pub entry: LinkEntry,
    pub status: DownloadStatus,
}

#[derive(Debug, PartialEq)]
pub enum DownloadStatus {
    Success { bytes: u64 },
    Failed(FailureCause),
}

/// One failed item and why, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub target: String,
    pub cause: FailureCause,
}

#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub bytes: u64,
    pub duration: Duration,
    pub failures: Vec<Failure>,
}

impl DownloadSummary {
    pub fn from_results(results: &[DownloadResult], duration: Duration) -> Self {
        let mut summary = DownloadSummary {
            attempted: results.len(),
            duration,
            ..Default::default()
        };
        for result in results {
            match &result.status {
                DownloadStatus::Success { bytes } => {
                    summary.succeeded += 1;
                    summary.bytes += bytes;
                }
                DownloadStatus::Failed(cause) => summary.failures.push(Failure {
                    target: result.entry.url.to_string(),
                    cause: cause.clone(),
                }),
            }
        }
        summary
    }

    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    /// Folds another pass over the same section into this one.
    pub fn absorb(&mut self, other: DownloadSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.bytes += other.bytes;
        self.duration += other.duration;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug)]
pub struct SectionReport {
    pub title: String,
    pub url: String,
    pub dir: PathBuf,
    pub summary: DownloadSummary,
    /// Failures that happened while discovering links, not while downloading.
    pub discovery_failures: Vec<Failure>,
    pub warnings: Vec<String>,
}

impl SectionReport {
    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.discovery_failures
            .iter()
            .chain(self.summary.failures.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    Running,
    Finalized,
}

impl RunState {
    fn name(self) -> &'static str {
        match self {
            RunState::Initialized => "INITIALIZED",
            RunState::Running => "RUNNING",
            RunState::Finalized => "FINALIZED",
        }
    }
}

/// One execution against one descriptor, owning one dated directory.
#[derive(Debug)]
pub struct ArchiveRun {
    pub source: String,
    pub dataset: String,
    pub attribution: String,
    pub started: DateTime<Local>,
    pub date: NaiveDate,
    pub output_dir: PathBuf,
    pub sections: Vec<SectionReport>,
    state: RunState,
}

impl ArchiveRun {
    /// Creates the run and its output directory: `<root>/<key>/downloaded-<date>`.
    pub fn create(
        descriptor: &SourceDescriptor,
        output_root: &Path,
        date: NaiveDate,
    ) -> Result<Self, ArchiveError> {
        let output_dir = output_dir_for(output_root, descriptor.key, date);
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            source: descriptor.key.to_string(),
            dataset: descriptor.dataset.to_string(),
            attribution: descriptor.attribution.to_string(),
            started: Local::now(),
            date,
            output_dir,
            sections: Vec::new(),
            state: RunState::Initialized,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn date_label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn start(&mut self) -> Result<(), ArchiveError> {
        self.transition(RunState::Initialized, RunState::Running)
    }

    pub fn finish(&mut self) -> Result<(), ArchiveError> {
        self.transition(RunState::Running, RunState::Finalized)
    }

    fn transition(&mut self, from: RunState, to: RunState) -> Result<(), ArchiveError> {
        if self.state != from {
            return Err(ArchiveError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn attempted(&self) -> usize {
        self.sections.iter().map(|s| s.summary.attempted).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.sections.iter().map(|s| s.summary.succeeded).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.sections.iter().map(|s| s.summary.bytes).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.sections.iter().flat_map(|s| s.failures())
    }
}

pub fn output_dir_for(output_root: &Path, key: &str, date: NaiveDate) -> PathBuf {
    output_root
        .join(key)
        .join(format!("downloaded-{}", date.format("%Y-%m-%d")))
}
