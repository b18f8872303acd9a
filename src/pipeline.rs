use crate::documents;
use crate::downloader::Downloader;
use crate::error::ArchiveError;
use crate::fetch::Fetcher;
use crate::parser;
use crate::records;
use crate::report::{self, CountLine, Metadata};
use crate::types::{
    ArchiveRun, DocumentSet, DownloadSummary, Failure, LinkEntry, LinkRule, RecordApi, Section,
    SectionReport, SourceDescriptor, SourceLayout,
};
use bytes::Bytes;
use chrono::NaiveDate;
use log::{info, warn};
use std::path::{Path, PathBuf};
use url::Url;

/// Operator-side knobs; what gets archived comes from the descriptor alone.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_root: PathBuf,
    pub date: NaiveDate,
    /// Cap on entries per section, or collections for record APIs.
    pub limit: Option<usize>,
    pub rate_limit: Option<u64>,
    pub show_progress: bool,
}

/// Runs one descriptor end to end: discovery, sequential downloads, reports.
pub async fn archive(
    descriptor: &SourceDescriptor,
    fetcher: &dyn Fetcher,
    options: &RunOptions,
) -> Result<ArchiveRun, ArchiveError> {
    let mut run = ArchiveRun::create(descriptor, &options.output_root, options.date)?;
    info!(
        "Archiving {} into {}",
        descriptor.dataset,
        run.output_dir.display()
    );
    run.start()?;

    let root = run.output_dir.clone();
    match &descriptor.layout {
        SourceLayout::Single(section) => {
            let report = archive_section(descriptor, section, fetcher, &root, &run, options).await?;
            run.sections.push(report);
        }
        SourceLayout::Sectioned { home, sections } => {
            let home_url = Url::parse(home)?;
            let (page, title) = load_listing(fetcher, &home_url, None).await?;
            let date = run.date_label();
            report::write_webpage(&root, &date, &page).await?;
            report::write_metadata(
                &root,
                &Metadata {
                    dataset: descriptor.dataset,
                    attribution: descriptor.attribution,
                    title: &title,
                    url: home,
                    date: &date,
                    count: CountLine::SeeSubfolders,
                },
            )
            .await?;

            for section in sections {
                let dir = match &section.subfolder {
                    Some(sub) => root.join(sub),
                    None => root.clone(),
                };
                let report = archive_section(descriptor, section, fetcher, &dir, &run, options).await?;
                run.sections.push(report);
            }
        }
        SourceLayout::Records(api) => {
            let report = archive_record_api(descriptor, api, fetcher, &root, &run, options).await?;
            run.sections.push(report);
        }
        SourceLayout::Documents(docs) => {
            let report = archive_documents(descriptor, docs, fetcher, &root, &run, options).await?;
            run.sections.push(report);
        }
    }

    run.finish()?;
    info!(
        "Finished {}: {} of {} items archived",
        descriptor.key,
        run.succeeded(),
        run.attempted()
    );
    Ok(run)
}

/// Fetches a listing page and works out its title. Both failures are fatal.
async fn load_listing(
    fetcher: &dyn Fetcher,
    url: &Url,
    title_override: Option<&str>,
) -> Result<(Bytes, String), ArchiveError> {
    let page = fetcher
        .fetch_bytes(url)
        .await
        .map_err(|cause| ArchiveError::Listing {
            url: url.to_string(),
            cause,
        })?;
    let title = match title_override {
        Some(title) => title.to_string(),
        None => parser::page_title(&String::from_utf8_lossy(&page)).ok_or_else(|| {
            ArchiveError::MissingElement {
                selector: "title".to_string(),
                url: url.to_string(),
            }
        })?,
    };
    Ok((page, title))
}

async fn archive_section(
    descriptor: &SourceDescriptor,
    section: &Section,
    fetcher: &dyn Fetcher,
    dir: &Path,
    run: &ArchiveRun,
    options: &RunOptions,
) -> Result<SectionReport, ArchiveError> {
    let page_url = Url::parse(&section.url)?;
    let (page, title) = load_listing(fetcher, &page_url, section.title.as_deref()).await?;
    let date = run.date_label();
    tokio::fs::create_dir_all(dir).await?;

    if section.rules.is_empty() {
        info!("Saving snapshot of {}", page_url);
        report::write_webpage(dir, &date, &page).await?;
        return Ok(SectionReport {
            title,
            url: section.url.clone(),
            dir: dir.to_path_buf(),
            summary: DownloadSummary::default(),
            discovery_failures: Vec::new(),
            warnings: Vec::new(),
        });
    }

    let html = String::from_utf8_lossy(&page).into_owned();
    let (entries, discovery_failures) = discover(section, &page_url, &html, fetcher).await?;
    let mut entries = parser::dedup(entries);
    // Nothing found and nothing failed means the page no longer looks as expected.
    if entries.is_empty() && discovery_failures.is_empty() {
        return Err(ArchiveError::NoLinks(section.url.clone()));
    }
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }
    parser::assign_local_paths(&mut entries, section.partition_folders);
    info!("{} links to download from {}", entries.len(), title);

    if entries.is_empty() && !discovery_failures.is_empty() {
        warn!(
            "No links discovered on {}; {} listings could not be retrieved",
            section.url,
            discovery_failures.len()
        );
    }

    let summary = Downloader::new(fetcher, options.rate_limit, descriptor.pause)
        .with_progress(options.show_progress)
        .download_all(&entries, dir)
        .await;
    info!(
        "Finished downloading {} files from {}",
        summary.succeeded, title
    );

    let report = SectionReport {
        title,
        url: section.url.clone(),
        dir: dir.to_path_buf(),
        summary,
        discovery_failures,
        warnings: Vec::new(),
    };
    report::write_webpage(dir, &date, &page).await?;
    report::write_metadata(
        dir,
        &Metadata {
            dataset: descriptor.dataset,
            attribution: descriptor.attribution,
            title: &report.title,
            url: &report.url,
            date: &date,
            count: CountLine::Files(report.summary.succeeded),
        },
    )
    .await?;
    report::write_errors(dir, &date, report.failures()).await?;
    Ok(report)
}

/// Applies every rule of the section in order. Secondary fetches that fail
/// are returned as failures; layout problems are errors.
async fn discover(
    section: &Section,
    page_url: &Url,
    html: &str,
    fetcher: &dyn Fetcher,
) -> Result<(Vec<LinkEntry>, Vec<Failure>), ArchiveError> {
    let mut entries = Vec::new();
    let mut failures = Vec::new();

    for rule in &section.rules {
        match rule {
            LinkRule::Anchors(anchors) => {
                let scan = parser::scan_anchors(html, page_url, anchors)?;
                entries.extend(scan.links);

                let Some(follow) = &anchors.follow else {
                    continue;
                };
                let pages = scan.follow.len();
                let mut found = 0;
                for sub_url in scan.follow {
                    match fetcher.fetch_bytes(&sub_url).await {
                        Ok(body) => {
                            let links = parser::all_anchors(
                                &String::from_utf8_lossy(&body),
                                &sub_url,
                                &follow.container,
                                anchors.base.as_deref(),
                            )?;
                            if links.is_empty() {
                                warn!("No links in `{}` on {}", follow.container, sub_url);
                            }
                            found += links.len();
                            entries.extend(links);
                        }
                        Err(cause) => {
                            warn!("Could not retrieve {} because of {}", sub_url, cause);
                            failures.push(Failure {
                                target: sub_url.to_string(),
                                cause,
                            });
                        }
                    }
                }
                info!(
                    "Got {} additional links for {} pages linked from {}",
                    found, pages, page_url
                );
            }
            LinkRule::Manifest { url } => {
                let url = Url::parse(url)?;
                read_manifest(fetcher, &url, None, &mut entries, &mut failures).await;
            }
            LinkRule::Partitioned {
                template,
                partitions,
            } => {
                for partition in partitions {
                    let url = Url::parse(&template.replace("{}", partition))?;
                    read_manifest(fetcher, &url, Some(partition), &mut entries, &mut failures).await;
                }
            }
            LinkRule::JsonIndex {
                url,
                link_field,
                partition_field,
            } => {
                let url = Url::parse(url)?;
                match fetcher.fetch_bytes(&url).await {
                    Ok(body) => entries.extend(parser::parse_json_index(
                        &body,
                        &url,
                        link_field,
                        partition_field.as_deref(),
                    )?),
                    Err(cause) => {
                        warn!("Could not retrieve {} because of {}", url, cause);
                        failures.push(Failure {
                            target: url.to_string(),
                            cause,
                        });
                    }
                }
            }
        }
    }

    Ok((entries, failures))
}

async fn read_manifest(
    fetcher: &dyn Fetcher,
    url: &Url,
    partition: Option<&str>,
    entries: &mut Vec<LinkEntry>,
    failures: &mut Vec<Failure>,
) {
    match fetcher.fetch_bytes(url).await {
        Ok(body) => {
            let links = parser::parse_manifest(&String::from_utf8_lossy(&body), url, partition);
            info!("{} links listed in {}", links.len(), url);
            entries.extend(links);
        }
        Err(cause) => {
            warn!("Could not retrieve manifest {} because of {}", url, cause);
            failures.push(Failure {
                target: url.to_string(),
                cause,
            });
        }
    }
}

async fn archive_record_api(
    descriptor: &SourceDescriptor,
    api: &RecordApi,
    fetcher: &dyn Fetcher,
    dir: &Path,
    run: &ArchiveRun,
    options: &RunOptions,
) -> Result<SectionReport, ArchiveError> {
    let mut ids = records::list_ids(fetcher, api).await?;
    if ids.is_empty() {
        return Err(ArchiveError::NoLinks(api.catalog_url.clone()));
    }
    if let Some(limit) = options.limit {
        ids.truncate(limit);
    }

    let outcome = records::archive_records(fetcher, api, &ids, dir, descriptor.pause).await?;
    info!(
        "Finished downloading {} files from {}",
        outcome.summary.succeeded, api.url
    );

    let date = run.date_label();
    report::write_metadata(
        dir,
        &Metadata {
            dataset: descriptor.dataset,
            attribution: descriptor.attribution,
            title: &api.title,
            url: &api.url,
            date: &date,
            count: CountLine::DataFiles(outcome.summary.succeeded),
        },
    )
    .await?;
    report::write_record_counts(dir, &outcome.counts)?;
    report::write_errors(dir, &date, &outcome.summary.failures).await?;

    Ok(SectionReport {
        title: api.title.clone(),
        url: api.url.clone(),
        dir: dir.to_path_buf(),
        summary: outcome.summary,
        discovery_failures: Vec::new(),
        warnings: outcome.warnings,
    })
}

async fn archive_documents(
    descriptor: &SourceDescriptor,
    docs: &DocumentSet,
    fetcher: &dyn Fetcher,
    dir: &Path,
    run: &ArchiveRun,
    options: &RunOptions,
) -> Result<SectionReport, ArchiveError> {
    let intro_url = Url::parse(&docs.url)?;
    let (page, title) = load_listing(fetcher, &intro_url, Some(&docs.title)).await?;
    let date = run.date_label();
    report::write_webpage(dir, &date, &page).await?;

    let mut entries = documents::saved_files(docs)?;
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }
    info!("{} documents to download from {}", entries.len(), title);
    let mut summary = Downloader::new(fetcher, options.rate_limit, descriptor.pause)
        .with_progress(options.show_progress)
        .download_all(&entries, dir)
        .await;
    summary.absorb(documents::archive_collections(fetcher, docs, dir, options.limit).await?);
    info!(
        "Finished downloading {} documents from {}",
        summary.succeeded, title
    );

    let report = SectionReport {
        title,
        url: docs.url.clone(),
        dir: dir.to_path_buf(),
        summary,
        discovery_failures: Vec::new(),
        warnings: Vec::new(),
    };
    report::write_metadata(
        dir,
        &Metadata {
            dataset: descriptor.dataset,
            attribution: descriptor.attribution,
            title: &report.title,
            url: &report.url,
            date: &date,
            count: CountLine::Files(report.summary.succeeded),
        },
    )
    .await?;
    report::write_errors(dir, &date, report.failures()).await?;
    Ok(report)
}
