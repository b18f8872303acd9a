//! Every publisher this tool knows how to archive. Quirks of a site are
//! declared here as data; the pipeline never branches on a URL.

use crate::error::ArchiveError;
use crate::types::{
    AnchorRule, Collection, DocumentSet, LinkFilter, LinkRule, Pause, RecordApi, SavedPage, Section,
    SourceDescriptor, SourceLayout,
};

const ATTRIBUTION: &str = "Frank Donnelly, Head of GIS & Data Services, Brown University Library";

const COASTAL_STATES: &[&str] = &[
    "AK", "AL", "AS", "CA", "CT", "DC", "DE", "FL", "GA", "GU", "HI", "LA", "MA", "MD", "ME", "MP",
    "MS", "NC", "NH", "NJ", "NY", "OR", "PA", "PR", "RI", "SC", "TX", "VA", "VI", "WA",
];

/// Mapping Confidence spells out three of the territories.
const COASTAL_STATES_SPELLED: &[&str] = &[
    "AK", "AL", "AS", "CA", "CT", "DC", "DE", "FL", "GA", "Guam", "HI", "LA", "MA", "MD", "ME",
    "CNMI", "MS", "NC", "NH", "NJ", "NY", "OR", "PA", "PR", "RI", "SC", "TX", "VA", "USVI", "WA",
];

const GREAT_LAKES: &[&str] = &[
    "Erie", "Huron1", "Huron2", "Huron3", "Michigan1", "Michigan2", "Michigan3", "Michigan4",
    "Michigan5", "Michigan6", "Michigan7", "Michigan8", "Ontario", "St_Clair", "Superior1",
    "Superior2", "Superior3", "Superior4", "Superior5", "Superior6", "Superior7",
];

pub fn all() -> Vec<SourceDescriptor> {
    vec![
        imls_pls(),
        imls_mdf(),
        irs_eo_bmf(),
        noaa_ncei_cag(),
        noaa_slr(),
        noaa_ll(),
        dhs_indicators(),
        dhs_docs(),
        dhs_publications(),
    ]
}

pub fn find(key: &str) -> Result<SourceDescriptor, ArchiveError> {
    all()
        .into_iter()
        .find(|d| d.key.eq_ignore_ascii_case(key))
        .ok_or_else(|| ArchiveError::UnknownSource(key.to_string()))
}

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn imls_pls() -> SourceDescriptor {
    SourceDescriptor {
        key: "imls-pls",
        dataset: "IMLS Public Library Survey",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Single(
            Section::page("https://www.imls.gov/research-evaluation/surveys/public-libraries-survey-pls")
                .with_rule(LinkRule::Anchors(
                    AnchorRule::new(
                        "div.usa-main-container",
                        LinkFilter::suffixes(&[".pdf", ".zip", ".xlsx"]),
                    )
                    .based_at("https://www.imls.gov")
                    // Publications sit on their own pages, linked from a table.
                    .following("/publications/", "table"),
                )),
        ),
        pause: None,
    }
}

fn imls_mdf() -> SourceDescriptor {
    SourceDescriptor {
        key: "imls-mdf",
        dataset: "IMLS Museum Data Files",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Single(
            Section::page("https://www.imls.gov/research-evaluation/data/museum-data-files").with_rule(
                // Files are linked site-relative; anything else on the page is navigation.
                LinkRule::Anchors(
                    AnchorRule::new(
                        "div.usa-main-container",
                        LinkFilter::prefixes(&["/"]).ending_with(&[".pdf", ".zip"]),
                    )
                    .based_at("https://www.imls.gov"),
                ),
            ),
        ),
        pause: None,
    }
}

fn irs_eo_bmf() -> SourceDescriptor {
    SourceDescriptor {
        key: "irs-eo-bmf",
        dataset: "IRS SOI Exempt Organizations Business Master File Extract",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Single(
            Section::page(
                "https://www.irs.gov/charities-non-profits/exempt-organizations-business-master-file-extract-eo-bmf",
            )
            .with_rule(LinkRule::Anchors(AnchorRule::new(
                "div.pup-header-content-rt",
                LinkFilter::suffixes(&[".pdf", ".csv", ".zip"]),
            ))),
        ),
        pause: None,
    }
}

fn noaa_ncei_cag() -> SourceDescriptor {
    SourceDescriptor {
        key: "noaa-ncei-cag",
        dataset: "NOAA NCEI Climate at a Glance",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Single(
            Section::page("https://www.ncei.noaa.gov/pub/data/cirs/climdiv/").with_rule(
                // Sort links and the parent directory start with these.
                LinkRule::Anchors(AnchorRule::new("table", LinkFilter::excluding(&["?", "/"]))),
            ),
        ),
        pause: None,
    }
}

/// A bulk-download page whose data is listed in one `URLlist_*.txt`.
fn listed_section(page: &str, manifest: &str) -> Section {
    Section::page(page)
        .in_own_folder()
        .with_rule(LinkRule::Manifest {
            url: manifest.to_string(),
        })
        .with_rule(extra_pdfs())
}

/// A bulk-download page with one `URLlist_<key>.txt` per partition.
fn partitioned_section(page: &str, template: &str, partitions: &[&str]) -> Section {
    Section::page(page)
        .in_own_folder()
        .with_rule(LinkRule::Partitioned {
            template: template.to_string(),
            partitions: keys(partitions),
        })
        .with_rule(extra_pdfs())
}

fn extra_pdfs() -> LinkRule {
    LinkRule::Anchors(AnchorRule::new("body", LinkFilter::suffixes(&[".pdf"])))
}

fn noaa_slr() -> SourceDescriptor {
    let base = "https://coast.noaa.gov/slrdata";
    let mut sections = vec![Section::page("https://coast.noaa.gov/slr/#/updates/data/").in_own_folder()];
    for (page, manifest) in [
        ("Ancillary", "URLlist_Ancillary.txt"),
        (
            "Ancillary/NOAA_OCM_SLR_MergedPolys_Shapefiles_0225",
            "URLlist_NOAA_OCM_SLR_MergedPolys_Shapefiles_0225.txt",
        ),
        ("High_Tide_Flooding", "URLlist_High_Tide_Flooding.txt"),
        ("Tidal_Surfaces", "URLlist_Tidal_Surfaces.txt"),
    ] {
        sections.push(listed_section(
            &format!("{base}/{page}/index.html"),
            &format!("{base}/{page}/{manifest}"),
        ));
    }
    for (page, states) in [
        ("Depth_Rasters", COASTAL_STATES),
        ("Extent_Rasters", COASTAL_STATES),
        ("Mapping_Confidence", COASTAL_STATES_SPELLED),
        ("Sea_Level_Rise_Vectors", COASTAL_STATES),
    ] {
        sections.push(partitioned_section(
            &format!("{base}/{page}/index.html"),
            &format!("{base}/{page}/{{}}/URLlist_{{}}.txt"),
            states,
        ));
    }
    sections.push(
        Section::page(
            "https://coastalimagery.blob.core.windows.net/ccap-landcover/CCAP_bulk_download/Sea_Level_Rise_Wetland_Impacts/index.html",
        )
        .in_own_folder()
        .with_rule(LinkRule::Anchors(AnchorRule::new("body", LinkFilter::suffixes(&[".zip"])))),
    );

    SourceDescriptor {
        key: "noaa-slr",
        dataset: "NOAA Coast Sea Level Rise Viewer",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Sectioned {
            home: format!("{base}/index.html"),
            sections,
        },
        pause: None,
    }
}

fn noaa_ll() -> SourceDescriptor {
    let base = "https://chs.coast.noaa.gov/htdata/Inundation/GreatLakes/BulkDownload";
    let mut sections = Vec::new();
    for page in ["DEMs", "Lake_Level_Vectors"] {
        sections.push(listed_section(
            &format!("{base}/{page}/index.html"),
            &format!("{base}/{page}/URLlist_{page}.txt"),
        ));
    }
    for page in ["Depth_Rasters", "Extent_Rasters"] {
        sections.push(partitioned_section(
            &format!("{base}/{page}/index.html"),
            &format!("{base}/{page}/{{}}/URLlist_{{}}.txt"),
            GREAT_LAKES,
        ));
    }

    SourceDescriptor {
        key: "noaa-ll",
        dataset: "NOAA Coast Lake Level Viewer",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Sectioned {
            home: format!("{base}/index.html"),
            sections,
        },
        pause: None,
    }
}

fn dhs_indicators() -> SourceDescriptor {
    SourceDescriptor {
        key: "dhs-indicators",
        dataset: "USAID DHS Indicators",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Records(RecordApi {
            url: "https://api.dhsprogram.com/".to_string(),
            title: "The DHS Program API".to_string(),
            catalog_url: "https://api.dhsprogram.com/rest/dhs/surveys".to_string(),
            id_field: "SurveyId".to_string(),
            data_template:
                "https://api.dhsprogram.com/rest/dhs/v8/data?surveyIds={id}&breakdown={breakdown}&page={page}"
                    .to_string(),
            breakdowns: keys(&["National", "Subnational", "Background"]),
        }),
        pause: Some(Pause::between_secs(10, 20)),
    }
}

fn dhs_docs() -> SourceDescriptor {
    let api = "https://api.dhsprogram.com/rest/dhs";
    let collection = |name: &str| Collection::single(&format!("{api}/{name}"));
    let mut collections: Vec<Collection> = [
        "indicators",
        "countries",
        "surveys",
        "surveycharacteristics",
        "publications",
        "datasets",
        "tags",
        "dataupdates",
        "uiupdates",
        "info",
    ]
    .into_iter()
    .map(collection)
    .collect();
    // Capped at 5000 records per response.
    collections.push(Collection::paged(&format!("{api}/geometry")));

    let guides = "https://www.dhsprogram.com/pubs/pdf/DHSG1";
    SourceDescriptor {
        key: "dhs-docs",
        dataset: "USAID DHS Indicators",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Documents(DocumentSet {
            url: "https://api.dhsprogram.com/".to_string(),
            title: "The DHS Program API".to_string(),
            folder: "_CODEBOOKS".to_string(),
            pages: vec![
                SavedPage::new(&format!("{api}/info/citation?f=html"), "info_citation.html"),
                SavedPage::new(&format!("{api}/data/fields"), "_CODEBOOKS/data_fields.html"),
            ],
            collections,
            files: [
                "Guide_to_DHS_Statistics_DHS-8.pdf",
                "Guide_to_DHS_Statistics_DHS-7_v2.pdf",
                "Guide_to_DHS_Statistics_DHS-7.pdf",
                "Guide_to_DHS_Statistics_29Oct2012_DHSG1.pdf",
            ]
            .iter()
            .map(|pdf| format!("{guides}/{pdf}"))
            .collect(),
        }),
        pause: None,
    }
}

fn dhs_publications() -> SourceDescriptor {
    SourceDescriptor {
        key: "dhs-publications",
        dataset: "USAID DHS Publications",
        attribution: ATTRIBUTION,
        layout: SourceLayout::Single(
            Section::page("https://api.dhsprogram.com/")
                .titled("The DHS Program API")
                .with_rule(LinkRule::JsonIndex {
                    url: "https://api.dhsprogram.com/rest/dhs/publications".to_string(),
                    link_field: "PublicationURL".to_string(),
                    partition_field: Some("SurveyId".to_string()),
                })
                .partition_folders(),
        ),
        pause: None,
    }
}
