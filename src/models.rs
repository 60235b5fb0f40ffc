use std::fmt;

use serde::{Deserialize, Serialize};

/// The two scraped pages, which double as cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Overview,
    Statistics,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Overview => "overview",
            Endpoint::Statistics => "statistics",
        }
    }

    /// Absolute URL of the page on the placement site.
    pub fn url(&self, site_url: &str) -> String {
        let path = match self {
            Endpoint::Overview => "placement",
            Endpoint::Statistics => "placement/statistics",
        };
        format!("{}/{}", site_url.trim_end_matches('/'), path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionTag {
    H1,
    H2,
    H3,
    P,
    Ul,
    Ol,
}

impl SectionTag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "h1" => Some(SectionTag::H1),
            "h2" => Some(SectionTag::H2),
            "h3" => Some(SectionTag::H3),
            "p" => Some(SectionTag::P),
            "ul" => Some(SectionTag::Ul),
            "ol" => Some(SectionTag::Ol),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub tag: SectionTag,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl Cell {
    pub fn text(text: impl Into<String>) -> Self {
        Cell { text: text.into(), href: None }
    }

    pub fn link(text: impl Into<String>, href: impl Into<String>) -> Self {
        Cell { text: text.into(), href: Some(href.into()) }
    }
}

pub type Row = Vec<Cell>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewPage {
    pub url: String,
    pub images: Vec<String>,
    pub sections: Vec<Section>,
    pub raw_html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsPage {
    pub url: String,
    pub images: Vec<String>,
    pub headings: Vec<String>,
    pub tables: Vec<Table>,
    pub raw_html: String,
}

/// A fully extracted page, serialized without a tag so each endpoint
/// returns its own shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedPage {
    Statistics(StatisticsPage),
    Overview(OverviewPage),
}
