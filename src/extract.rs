//! Turns the placement site's markup into the JSON shapes the frontend renders.
//!
//! Everything here is pure: the same markup and page URL always produce the
//! same page.

use ammonia::{Builder, UrlRelative};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Cell, OverviewPage, Section, SectionTag, StatisticsPage, Table};

// Tried in order; the first match with non-blank content wins.
static REGION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [".region-content", ".main-content", "#content"]
        .iter()
        .map(|s| Selector::parse(s).expect("Failed to parse region selector"))
        .collect()
});

static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("img").expect("Failed to parse img selector")
});

static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("table").expect("Failed to parse table selector")
});

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("tbody tr").expect("Failed to parse row selector")
});

static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td").expect("Failed to parse cell selector")
});

static HEADER_CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("thead th").expect("Failed to parse header selector")
});

static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a").expect("Failed to parse link selector")
});

pub const STATISTICS_HEADING: &str = "TCE Placement Statistics";

const DOWNLOAD_HEADERS: &[&str] = &["S.No", "Year", "Download"];
const OFFER_HEADERS: &[&str] = &["S.No", "Year", "No. of Offers", "No. of Students Placed", "Download"];

/// The site ships its statistics tables without usable header rows, so the
/// first three get hand-written headers by position.
fn fixed_headers(index: usize) -> Option<&'static [&'static str]> {
    match index {
        0 | 2 => Some(DOWNLOAD_HEADERS),
        1 => Some(OFFER_HEADERS),
        _ => None,
    }
}

/// Resolves `link` against `base`. Anything that does not parse comes back as-is.
pub fn resolve_url(base: &str, link: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(link))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| link.to_string())
}

/// Strips scripts, event handlers and other non-allow-listed markup, and
/// rewrites relative links against the page URL.
pub fn sanitize(html: &str, page_url: &str) -> String {
    match ammonia::Url::parse(page_url) {
        Ok(base) => {
            let mut builder = Builder::default();
            builder.url_relative(UrlRelative::RewriteWithBase(base));
            builder.clean(html).to_string()
        }
        Err(_) => ammonia::clean(html),
    }
}

fn locate_region(document: &Html) -> Option<ElementRef<'_>> {
    REGION_SELECTORS.iter().find_map(|selector| {
        document
            .select(selector)
            .next()
            .filter(|region| !region.inner_html().trim().is_empty())
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub fn extract_overview(html: &str, page_url: &str) -> Result<OverviewPage> {
    let document = Html::parse_document(html);
    let region = locate_region(&document).ok_or_else(|| {
        AppError::ParseError("Could not locate placement overview section".to_string())
    })?;

    let images = region
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .filter(|src| !src.is_empty())
        .map(|src| resolve_url(page_url, src))
        .collect();

    let sections = region
        .children()
        .filter_map(ElementRef::wrap)
        .filter_map(|child| {
            let tag = SectionTag::from_name(child.value().name())?;
            Some(Section {
                tag,
                html: sanitize(&child.inner_html(), page_url),
            })
        })
        .collect();

    Ok(OverviewPage {
        url: page_url.to_string(),
        images,
        sections,
        raw_html: sanitize(&region.inner_html(), page_url),
    })
}

pub fn extract_statistics(html: &str, page_url: &str) -> Result<StatisticsPage> {
    let not_found = || AppError::ParseError("Could not locate placement statistics section".to_string());

    let mut document = Html::parse_document(html);
    let region_id = locate_region(&document).map(|region| region.id()).ok_or_else(not_found)?;

    // Images on this page are decorative file-type icons.
    let image_ids: Vec<_> = document
        .tree
        .get(region_id)
        .and_then(ElementRef::wrap)
        .map(|region| region.select(&IMG_SELECTOR).map(|img| img.id()).collect())
        .unwrap_or_default();
    for id in image_ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }

    let region = document
        .tree
        .get(region_id)
        .and_then(ElementRef::wrap)
        .ok_or_else(not_found)?;

    let tables = region
        .select(&TABLE_SELECTOR)
        .enumerate()
        .map(|(index, table)| extract_table(index, table, page_url))
        .collect();

    Ok(StatisticsPage {
        url: page_url.to_string(),
        images: Vec::new(),
        headings: vec![STATISTICS_HEADING.to_string()],
        tables,
        raw_html: sanitize(&region.inner_html(), page_url),
    })
}

fn extract_table(index: usize, table: ElementRef<'_>, page_url: &str) -> Table {
    let headers = match fixed_headers(index) {
        Some(headers) => headers.iter().map(|h| h.to_string()).collect(),
        None => table.select(&HEADER_CELL_SELECTOR).map(element_text).collect(),
    };

    let rows = table
        .select(&ROW_SELECTOR)
        .map(|tr| {
            tr.select(&CELL_SELECTOR)
                .map(|td| extract_cell(td, page_url))
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    Table { headers, rows }
}

fn extract_cell(td: ElementRef<'_>, page_url: &str) -> Cell {
    let text = element_text(td);
    let href = td
        .select(&LINK_SELECTOR)
        .next()
        .and_then(|link| link.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(|href| resolve_url(page_url, href));

    Cell { text, href }
}
