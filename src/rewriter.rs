use tracing::debug;

use crate::downloader::FetchReport;
use crate::html_parser::{attr, remove_attr, set_attr, Page};

/// Attribute that keeps the remote URL of a rewritten image.
pub const ORIGIN_SRC_ATTR: &str = "data-origin-src";

/// Attributes that may still point at remote copies once `src` is local.
const REMOTE_HINT_ATTRS: &[&str] = &["loading", "srcset"];

/// Points every image with a usable outcome at its local copy.
///
/// Lookups go through the source URL, so the result does not depend on the
/// order in which fetches finished. Images without a usable outcome are left
/// exactly as they were. Returns the number of elements rewritten.
pub fn rewrite_images(page: &Page, report: &FetchReport) -> usize {
    let mut rewritten = 0;

    for img in page.elements("img") {
        let Some(src) = attr(&img, "src") else {
            continue;
        };
        let Some(outcome) = report.get(&src) else {
            continue;
        };
        if !outcome.is_usable() {
            continue;
        }

        let local = outcome.image.local_src();
        debug!(src = %src, local = %local, "replace image reference");

        for name in REMOTE_HINT_ATTRS {
            remove_attr(&img, name);
        }
        set_attr(&img, ORIGIN_SRC_ATTR, &src);
        set_attr(&img, "src", &local);
        rewritten += 1;
    }

    rewritten
}
