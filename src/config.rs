use std::path::PathBuf;
use std::time::Duration;

/// Maximum image fetches in flight for one document.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Per-image timeout, covering the probe and the full transfer.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for re-fetching a full article page for site rules.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:94.0) Gecko/20100101 Firefox/94.0";

#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub images_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Mirror remote images and point the HTML at the local copies.
    pub offline: bool,
    pub verbose: bool,
    pub max_concurrent: usize,
    pub fetch_timeout: Duration,
    pub page_timeout: Duration,
    pub user_agent: String,
    pub site_rules: bool,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("."),
            offline: false,
            verbose: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            site_rules: true,
        }
    }
}
