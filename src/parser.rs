use crate::error::ArchiveError;
use crate::types::{AnchorRule, LinkEntry, LinkFilter};
use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Result of scanning one listing page.
#[derive(Debug, Default)]
pub struct AnchorScan {
    pub links: Vec<LinkEntry>,
    /// Secondary pages to scan for more links.
    pub follow: Vec<Url>,
}

fn create_selector(sel: &str) -> Result<Selector, ArchiveError> {
    Selector::parse(sel).map_err(|_| ArchiveError::InvalidSelector(sel.into()))
}

/// Text of the first `<title>`, whitespace-collapsed.
pub fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = doc
        .select(&selector)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Scans the anchors inside `rule.container`. Anchors without an href are
/// skipped; a missing container is an error since it means the layout changed.
pub fn scan_anchors(html: &str, page_url: &Url, rule: &AnchorRule) -> Result<AnchorScan, ArchiveError> {
    let base = match &rule.base {
        Some(base) => Url::parse(base)?,
        None => page_url.clone(),
    };
    let doc = Html::parse_document(html);
    let container = find_container(&doc, &rule.container, page_url)?;
    let anchor = create_selector("a")?;

    let mut scan = AnchorScan::default();
    for element in container.select(&anchor) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            debug!("Skipping anchor without href on {}", page_url);
            continue;
        };
        if rule.filter.matches(href) {
            if let Some(url) = resolve(&base, href) {
                scan.links.push(LinkEntry::new(url, None));
            }
        } else if let Some(follow) = &rule.follow {
            if href.starts_with(follow.prefix.as_str()) {
                if let Some(url) = resolve(&base, href) {
                    scan.follow.push(url);
                }
            }
        }
    }
    debug!(
        "{} links and {} follow-up pages in `{}` on {}",
        scan.links.len(),
        scan.follow.len(),
        rule.container,
        page_url
    );
    Ok(scan)
}

/// Every anchor with an href inside `container`, for follow-up pages.
pub fn all_anchors(
    html: &str,
    page_url: &Url,
    container: &str,
    base: Option<&str>,
) -> Result<Vec<LinkEntry>, ArchiveError> {
    let rule = AnchorRule {
        container: container.to_string(),
        filter: LinkFilter::default(),
        base: base.map(str::to_string),
        follow: None,
    };
    Ok(scan_anchors(html, page_url, &rule)?.links)
}

fn find_container<'a>(doc: &'a Html, sel: &str, page_url: &Url) -> Result<ElementRef<'a>, ArchiveError> {
    let selector = create_selector(sel)?;
    doc.select(&selector)
        .next()
        .ok_or_else(|| ArchiveError::MissingElement {
            selector: sel.to_string(),
            url: page_url.to_string(),
        })
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    match base.join(href) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(url) => {
            debug!("Ignoring non-http link {}", url);
            None
        }
        Err(e) => {
            warn!("Could not resolve link {:?} against {}: {}", href, base, e);
            None
        }
    }
}

/// Non-blank lines of a manifest. A trailing newline yields no empty entry.
pub fn manifest_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Resolves each manifest line against the manifest's own URL.
pub fn parse_manifest(text: &str, manifest_url: &Url, partition: Option<&str>) -> Vec<LinkEntry> {
    manifest_lines(text)
        .into_iter()
        .filter_map(|line| resolve(manifest_url, line))
        .map(|url| LinkEntry::new(url, partition.map(str::to_string)))
        .collect()
}

/// Links from a JSON listing of the form `{"Data": [{..}, ..]}`.
pub fn parse_json_index(
    body: &[u8],
    index_url: &Url,
    link_field: &str,
    partition_field: Option<&str>,
) -> Result<Vec<LinkEntry>, ArchiveError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let records = value
        .get("Data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ArchiveError::MissingElement {
            selector: "Data".to_string(),
            url: index_url.to_string(),
        })?;

    let mut entries = Vec::new();
    for record in records {
        let Some(link) = record.get(link_field).and_then(|v| v.as_str()) else {
            debug!("Record without `{}` in {}", link_field, index_url);
            continue;
        };
        let partition = partition_field
            .and_then(|field| record.get(field))
            .and_then(scalar_to_string);
        if let Some(url) = resolve(index_url, link.trim()) {
            entries.push(LinkEntry::new(url, partition));
        }
    }
    Ok(entries)
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Drops repeated URLs, keeping the first occurrence.
pub fn dedup(entries: Vec<LinkEntry>) -> Vec<LinkEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.url.clone()))
        .collect()
}

/// Gives every entry a distinct relative path. Same-named files are moved
/// into a folder named after their partition (or parent path segment), then
/// into numbered folders, never overwritten. A file never takes a name that
/// another entry needs as a folder, and the reverse.
pub fn assign_local_paths(entries: &mut [LinkEntry], partition_folders: bool) {
    let mut claims = PathClaims::default();
    for entry in entries.iter_mut() {
        let preferred = match (&entry.partition, partition_folders) {
            (Some(partition), true) => PathBuf::from(folder_name(partition)).join(&entry.name),
            _ => PathBuf::from(&entry.name),
        };

        let mut candidate = preferred.clone();
        if !claims.is_free(&candidate) {
            let scope = entry
                .partition
                .clone()
                .filter(|_| !partition_folders)
                .or_else(|| parent_segment(&entry.url));
            if let Some(scope) = scope {
                candidate = PathBuf::from(folder_name(&scope)).join(&preferred);
            }
            let mut n = 2;
            while !claims.is_free(&candidate) {
                candidate = PathBuf::from(n.to_string()).join(&preferred);
                n += 1;
            }
            debug!("{} collides, storing as {}", entry.name, candidate.display());
        }
        claims.claim(&candidate);
        entry.local_path = candidate;
    }
}

#[derive(Default)]
struct PathClaims {
    files: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
}

impl PathClaims {
    fn is_free(&self, path: &Path) -> bool {
        !self.files.contains(path)
            && !self.dirs.contains(path)
            && path.ancestors().skip(1).all(|dir| !self.files.contains(dir))
    }

    fn claim(&mut self, path: &Path) {
        self.files.insert(path.to_path_buf());
        for dir in path.ancestors().skip(1) {
            if !dir.as_os_str().is_empty() {
                self.dirs.insert(dir.to_path_buf());
            }
        }
    }
}

fn parent_segment(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    segments.len().checked_sub(2).map(|i| segments[i].to_string())
}

fn folder_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LinkFilter;

    const LISTING: &str = r#"
        <html><head><title>
            Public Libraries Survey | IMLS
        </title></head>
        <body>
          <a href="/outside.pdf">not in container</a>
          <div class="usa-main-container">
            <a href="/sites/default/files/pls_fy2022_csv.zip">CSV</a>
            <a name="top">anchor only</a>
            <a href="https://www.imls.gov/sites/default/files/fy2022_pls_data_file_documentation.pdf">Docs</a>
            <a>no attributes at all</a>
            <a href="/publications/public-libraries-united-states-survey-fiscal-year-2022">Report</a>
            <a href="/sites/default/files/PLS_FY2022_Supplementary.xlsx">Supplement</a>
            <a href="/about-us">About</a>
            <a href="mailto:someone@imls.gov">Mail.pdf</a>
          </div>
        </body></html>"#;

    fn imls_rule() -> AnchorRule {
        AnchorRule::new("div.usa-main-container", LinkFilter::suffixes(&[".pdf", ".zip", ".xlsx"]))
            .based_at("https://www.imls.gov")
            .following("/publications/", "table")
    }

    fn page() -> Url {
        Url::parse("https://www.imls.gov/research-evaluation/surveys/public-libraries-survey-pls").unwrap()
    }

    #[test]
    fn title_is_trimmed() {
        assert_eq!(page_title(LISTING).as_deref(), Some("Public Libraries Survey | IMLS"));
        assert_eq!(page_title("<html><body></body></html>"), None);
    }

    #[test]
    fn scan_keeps_matching_links_and_skips_hrefless_anchors() {
        let scan = scan_anchors(LISTING, &page(), &imls_rule()).unwrap();
        let urls: Vec<_> = scan.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.imls.gov/sites/default/files/pls_fy2022_csv.zip",
                "https://www.imls.gov/sites/default/files/fy2022_pls_data_file_documentation.pdf",
                "https://www.imls.gov/sites/default/files/PLS_FY2022_Supplementary.xlsx",
            ]
        );
        assert_eq!(scan.links[0].name, "pls_fy2022_csv.zip");
        assert_eq!(
            scan.follow,
            vec![Url::parse("https://www.imls.gov/publications/public-libraries-united-states-survey-fiscal-year-2022").unwrap()]
        );
    }

    #[test]
    fn scan_is_deterministic() {
        let first = scan_anchors(LISTING, &page(), &imls_rule()).unwrap();
        let second = scan_anchors(LISTING, &page(), &imls_rule()).unwrap();
        assert_eq!(first.links, second.links);
        assert_eq!(first.follow, second.follow);
    }

    #[test]
    fn missing_container_is_an_error() {
        let rule = AnchorRule::new("div.gone", LinkFilter::default());
        match scan_anchors(LISTING, &page(), &rule) {
            Err(ArchiveError::MissingElement { selector, .. }) => assert_eq!(selector, "div.gone"),
            other => panic!("expected MissingElement, got {other:?}"),
        }
    }

    #[test]
    fn relative_links_resolve_against_the_page() {
        let html = r#"<table>
            <tr><td><a href="?C=N;O=D">Name</a></td></tr>
            <tr><td><a href="/pub/data/cirs/">Parent Directory</a></td></tr>
            <tr><td><a href="climdiv-pcpndv-v1.0.0-20250106">climdiv-pcpndv</a></td></tr>
            <tr><td><a href="county-readme.txt">county-readme.txt</a></td></tr>
        </table>"#;
        let page = Url::parse("https://www.ncei.noaa.gov/pub/data/cirs/climdiv/").unwrap();
        let rule = AnchorRule::new("table", LinkFilter::excluding(&["?", "/"]));
        let links = scan_anchors(html, &page, &rule).unwrap().links;
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[1].url.as_str(),
            "https://www.ncei.noaa.gov/pub/data/cirs/climdiv/county-readme.txt"
        );
    }

    #[test]
    fn manifest_drops_trailing_blank_line() {
        let text = "https://coast.noaa.gov/a/1.zip\nhttps://coast.noaa.gov/a/2.zip\r\nhttps://coast.noaa.gov/a/3.zip\n";
        let lines = manifest_lines(text);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| !l.is_empty()));

        let url = Url::parse("https://coast.noaa.gov/a/URLlist_AK.txt").unwrap();
        let entries = parse_manifest(text, &url, Some("AK"));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].name, "3.zip");
        assert_eq!(entries[0].partition.as_deref(), Some("AK"));
    }

    #[test]
    fn json_index_reads_links_and_partitions() {
        let body = br#"{"Data": [
            {"PublicationURL": "https://dhsprogram.com/pubs/pdf/FR1/FR1.pdf", "SurveyId": "AF2015DHS"},
            {"PublicationURL": "https://dhsprogram.com/pubs/pdf/SR2/SR2.pdf", "SurveyId": ""},
            {"Title": "no link"}
        ]}"#;
        let url = Url::parse("https://api.dhsprogram.com/rest/dhs/publications").unwrap();
        let entries = parse_json_index(body, &url, "PublicationURL", Some("SurveyId")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].partition.as_deref(), Some("AF2015DHS"));
        assert_eq!(entries[1].partition, None);

        assert!(matches!(
            parse_json_index(b"{}", &url, "PublicationURL", None),
            Err(ArchiveError::MissingElement { .. })
        ));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = LinkEntry::new(Url::parse("https://x.gov/a.zip").unwrap(), None);
        let b = LinkEntry::new(Url::parse("https://x.gov/b.zip").unwrap(), None);
        let out = dedup(vec![a.clone(), b.clone(), a.clone()]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn colliding_names_get_distinct_paths() {
        let mut entries = vec![
            LinkEntry::new(Url::parse("https://coast.noaa.gov/d/AK/readme.pdf").unwrap(), Some("AK".into())),
            LinkEntry::new(Url::parse("https://coast.noaa.gov/d/AL/readme.pdf").unwrap(), Some("AL".into())),
            LinkEntry::new(Url::parse("https://coast.noaa.gov/e/readme.pdf").unwrap(), None),
            LinkEntry::new(Url::parse("https://coast.noaa.gov/e/other/x/readme.pdf").unwrap(), None),
            LinkEntry::new(Url::parse("https://coast.noaa.gov/f/x/readme.pdf").unwrap(), None),
        ];
        assign_local_paths(&mut entries, false);
        let paths: Vec<_> = entries.iter().map(|e| e.local_path.clone()).collect();
        assert_eq!(paths[0], PathBuf::from("readme.pdf"));
        assert_eq!(paths[1], PathBuf::from("AL/readme.pdf"));
        assert_eq!(paths[2], PathBuf::from("e/readme.pdf"));
        assert_eq!(paths[3], PathBuf::from("x/readme.pdf"));
        assert_eq!(paths[4], PathBuf::from("2/readme.pdf"));
        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), paths.len());
    }

    #[test]
    fn files_and_folders_never_share_a_name() {
        let mut entries = vec![
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/AL").unwrap(), None),
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/AK/readme.pdf").unwrap(), Some("AK".into())),
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/AL/readme.pdf").unwrap(), Some("AL".into())),
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/2").unwrap(), None),
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/q/AL/readme.pdf").unwrap(), Some("AL".into())),
        ];
        assign_local_paths(&mut entries, false);
        let paths: Vec<_> = entries.iter().map(|e| e.local_path.clone()).collect();
        assert_eq!(paths[0], PathBuf::from("AL"));
        assert_eq!(paths[1], PathBuf::from("readme.pdf"));
        assert_eq!(paths[2], PathBuf::from("2/readme.pdf"));
        assert_eq!(paths[3], PathBuf::from("d/2"));
        assert_eq!(paths[4], PathBuf::from("3/readme.pdf"));

        // Folder claimed first, then a file wanting the folder's name.
        let mut entries = vec![
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/AK/AL").unwrap(), Some("AK".into())),
            LinkEntry::new(Url::parse("https://www.ncei.noaa.gov/d/AK").unwrap(), None),
        ];
        assign_local_paths(&mut entries, true);
        assert_eq!(entries[0].local_path, PathBuf::from("AK/AL"));
        assert_eq!(entries[1].local_path, PathBuf::from("d/AK"));
    }

    #[test]
    fn partition_folders_group_by_partition() {
        let mut entries = vec![
            LinkEntry::new(Url::parse("https://dhsprogram.com/pubs/FR1.pdf").unwrap(), Some("AF2015DHS".into())),
            LinkEntry::new(Url::parse("https://dhsprogram.com/other/FR1.pdf").unwrap(), Some("AF2015DHS".into())),
            LinkEntry::new(Url::parse("https://dhsprogram.com/pubs/SR2.pdf").unwrap(), None),
        ];
        assign_local_paths(&mut entries, true);
        assert_eq!(entries[0].local_path, PathBuf::from("AF2015DHS/FR1.pdf"));
        assert_eq!(entries[1].local_path, PathBuf::from("other/AF2015DHS/FR1.pdf"));
        assert_eq!(entries[2].local_path, PathBuf::from("SR2.pdf"));
    }
}
