use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::html_parser::decode_entities;

/// An exported `starred.json` document.
#[derive(Debug, Default, Deserialize)]
pub struct Starred {
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Starred {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut starred: Starred =
            serde_json::from_reader(reader).context("cannot parse json")?;
        for item in &mut starred.items {
            item.decode_fields();
        }
        Ok(starred)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open file: {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot read {}", path.display()))
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    pub id: String,
    pub crawl_time_msec: String,
    pub timestamp_usec: String,
    pub categories: Vec<String>,
    pub title: String,
    pub published: i64,
    pub updated: i64,
    pub starred: i64,
    pub canonical: Vec<Canonical>,
    pub summary: Summary,
    pub author: String,
    pub origin: Origin,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Canonical {
    pub href: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub direction: String,
    pub content: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Origin {
    pub stream_id: String,
    pub title: String,
    pub html_url: String,
}

const HEADER_TEMPLATE: &str = r#"
<p>
	<a title="Published: {published}" href="{link}" style="display:block; color: #000; padding-bottom: 10px; text-decoration: none; font-size:1em; font-weight: normal;">
		<span style="display: block; color: #666; font-size:1.0em; font-weight: normal;">{origin}</span>
		<span style="font-size: 1.5em;">{title}</span>
	</a>
</p>"#;

const FOOTER_TEMPLATE: &str = r#"
<br/><br/>
<a style="display: block; display: inline-block; border-top: 1px solid #ccc; padding-top: 5px; color: #666; text-decoration: none;"
   href="{link}">{link}</a>
<p style="color:#999;">Save with <a style="color:#666; text-decoration:none; font-weight: bold;"
									href="https://github.com/gonejack/inostar">inostar</a>
</p>"#;

impl Item {
    fn decode_fields(&mut self) {
        self.title = decode_entities(&self.title);
        self.origin.title = decode_entities(&self.origin.title);
    }

    /// First canonical link, falling back to the feed's site URL.
    pub fn link(&self) -> &str {
        self.canonical
            .first()
            .map(|c| c.href.as_str())
            .unwrap_or(self.origin.html_url.as_str())
    }

    pub fn published_time(&self) -> DateTime<Local> {
        Local
            .timestamp_opt(self.published, 0)
            .single()
            .unwrap_or_else(|| DateTime::<Local>::from(UNIX_EPOCH))
    }

    pub fn header_html(&self) -> String {
        HEADER_TEMPLATE
            .replace("{link}", self.link())
            .replace("{origin}", &escape_html(&self.origin.title))
            .replace(
                "{published}",
                &self.published_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            )
            .replace("{title}", &escape_html(&self.title))
    }

    pub fn footer_html(&self) -> String {
        FOOTER_TEMPLATE.replace("{link}", self.link())
    }

    /// The body wrapped in the header and footer banners.
    pub fn patched_content(&self, body: &str) -> String {
        format!("{} {} {}", self.header_html(), body, self.footer_html())
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
