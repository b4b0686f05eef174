use anyhow::{Context, Result};
use markup5ever_rcdom::{Handle, NodeData};
use regex::Regex;
use reqwest::header::{REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use select::document::Document;
use select::predicate::{And, Class, Name, Predicate};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ConvertConfig;
use crate::html_parser::{
    attr, detach, is_element, parent, remove_attr, serialize_children, text_content, Page,
};
use crate::model::Item;

/// Removes known advertising blocks from a page.
#[derive(Debug, Clone, Copy)]
pub enum CleanRule {
    /// Drop the nearest `<center>` around a `<div>` whose text contains the marker.
    CenterAroundText(&'static str),
    /// Drop `<img>` elements with exactly this source.
    ImageWithSource(&'static str),
}

pub const CLEAN_RULES: &[CleanRule] = &[
    CleanRule::CenterAroundText("ads from inoreader"),
    CleanRule::ImageWithSource("https://img.solidot.org//0/446/liiLIZF8Uh6yM.jpg"),
];

impl CleanRule {
    pub fn apply(&self, page: &Page) {
        let doomed: Vec<_> = match *self {
            CleanRule::CenterAroundText(marker) => page
                .elements("div")
                .into_iter()
                .filter(|div| text_content(div).contains(marker))
                .filter_map(|div| closest(&div, "center"))
                .collect(),
            CleanRule::ImageWithSource(src) => page
                .elements("img")
                .into_iter()
                .filter(|img| attr(img, "src").as_deref() == Some(src))
                .collect(),
        };

        for (i, node) in doomed.iter().enumerate() {
            if doomed[..i].iter().any(|seen| Rc::ptr_eq(seen, node)) {
                continue;
            }
            debug!(rule = ?self, "removing element");
            detach(node);
        }
    }
}

pub fn clean_page(page: &Page) {
    for rule in CLEAN_RULES {
        rule.apply(page);
    }
}

fn closest(node: &Handle, tag: &str) -> Option<Handle> {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if is_element(&candidate, tag) {
            return Some(candidate);
        }
        current = parent(&candidate);
    }
    None
}

/// An element matched by tag name and class, e.g. `div.content`.
#[derive(Debug, Clone, Copy)]
pub struct Scope {
    pub tag: &'static str,
    pub class: &'static str,
}

impl Scope {
    fn predicate(&self) -> And<Name<&'static str>, Class<&'static str>> {
        Name(self.tag).and(Class(self.class))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SiteAction {
    /// Use the `content` element inside `container` of the full page as the body.
    ReplaceBody { container: Scope, content: Scope },
    /// Find a video URL in the scripts under `container` and put a player on top.
    PrependVideo { container: Scope, pattern: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct SiteRule {
    pub host_suffix: &'static str,
    pub action: SiteAction,
}

pub const SITE_RULES: &[SiteRule] = &[
    SiteRule {
        host_suffix: "sspai.com",
        action: SiteAction::ReplaceBody {
            container: Scope { tag: "div", class: "article-body" },
            content: Scope { tag: "div", class: "content" },
        },
    },
    SiteRule {
        host_suffix: "leimao.github.io",
        action: SiteAction::ReplaceBody {
            container: Scope { tag: "article", class: "article" },
            content: Scope { tag: "div", class: "content" },
        },
    },
    SiteRule {
        host_suffix: "thoughtworks.cn",
        action: SiteAction::ReplaceBody {
            container: Scope { tag: "article", class: "post" },
            content: Scope { tag: "div", class: "entry-wrap" },
        },
    },
    SiteRule {
        host_suffix: "huxiu.com",
        action: SiteAction::PrependVideo {
            container: Scope { tag: "div", class: "js-video-play-log-report-wrap" },
            pattern: r"'(https://.*video\.huxiucdn\.com/[^']+)'",
        },
    },
];

pub fn rule_for(link: &str) -> Option<&'static SiteRule> {
    let url = Url::parse(link).ok()?;
    let host = url.host_str()?;
    SITE_RULES.iter().find(|rule| host.ends_with(rule.host_suffix))
}

impl SiteAction {
    /// Builds the new summary from the full page, or `None` when the page
    /// does not have what the rule looks for.
    pub fn apply(&self, page_html: &str, summary: &str) -> Result<Option<String>> {
        let document = Document::from(page_html);

        match *self {
            SiteAction::ReplaceBody { container, content } => {
                let predicate = container.predicate().descendant(content.predicate());
                match document.find(predicate).next() {
                    Some(node) => Ok(Some(strip_presentation(&node.inner_html())?)),
                    None => Ok(None),
                }
            }
            SiteAction::PrependVideo { container, pattern } => {
                let script: String = document
                    .find(container.predicate().descendant(Name("script")))
                    .map(|node| node.text())
                    .collect();
                if script.is_empty() {
                    return Ok(None);
                }

                let regex = Regex::new(pattern).context("invalid video pattern")?;
                Ok(regex.captures(&script).and_then(|caps| caps.get(1)).map(|video| {
                    format!(
                        r#"<video autoplay controls width="100%"><source src="{}" type="video/mp4"></video>{}"#,
                        video.as_str(),
                        summary
                    )
                }))
            }
        }
    }
}

/// Drops `style` and `class` from every element of an HTML fragment.
fn strip_presentation(fragment: &str) -> Result<String> {
    let page = Page::parse(fragment);
    let Some(body) = page.first("body") else {
        return Ok(fragment.to_string());
    };

    for tag in collect_tags(&body) {
        remove_attr(&tag, "style");
        remove_attr(&tag, "class");
    }
    serialize_children(&body)
}

fn collect_tags(node: &Handle) -> Vec<Handle> {
    let mut tags = Vec::new();
    for child in node.children.borrow().iter() {
        if matches!(child.data, NodeData::Element { .. }) {
            tags.push(child.clone());
        }
        tags.extend(collect_tags(child));
    }
    tags
}

/// Re-fetches full article bodies for hosts whose feeds only carry excerpts.
pub struct SitePatcher {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl SitePatcher {
    pub fn new(config: &ConvertConfig) -> Result<Self> {
        let client = ClientBuilder::new().use_rustls_tls().build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            timeout: config.page_timeout,
        })
    }

    /// The item's summary, replaced or extended when a site rule applies.
    pub async fn summary_for(&self, item: &Item) -> String {
        let summary = item.summary.content.clone();
        let link = item.link();
        let Some(rule) = rule_for(link) else {
            return summary;
        };

        let page = match self.fetch_page(link).await {
            Ok(page) => page,
            Err(err) => {
                warn!(link, error = %err, "cannot grab link");
                return summary;
            }
        };

        match rule.action.apply(&page, &summary) {
            Ok(Some(patched)) => patched,
            Ok(None) => {
                warn!(link, "cannot parse content");
                summary
            }
            Err(err) => {
                warn!(link, error = %err, "cannot generate content");
                summary
            }
        }
    }

    async fn fetch_page(&self, link: &str) -> Result<String> {
        let html = self
            .client
            .get(link)
            .header(REFERER, link)
            .header(USER_AGENT, self.user_agent.as_str())
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(html.replace("<!--!-->", ""))
    }
}
