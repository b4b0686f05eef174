use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ConvertConfig;
use crate::downloader::{FetchReport, HttpTransport, ImagePool, Transport};
use crate::file_manager::{ensure_images_dir, FileManager};
use crate::html_parser::{extract_image_refs, Page};
use crate::model::{Item, Starred};
use crate::patch::{clean_page, SitePatcher};
use crate::rewriter::rewrite_images;

/// Totals for one run over a set of `starred.json` files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    pub files_failed: usize,
    pub items_converted: usize,
    pub items_failed: usize,
    pub images_downloaded: usize,
    pub images_skipped: usize,
    pub images_failed: usize,
}

impl ConvertSummary {
    fn record_images(&mut self, report: &FetchReport) {
        self.images_downloaded += report.downloaded();
        self.images_skipped += report.skipped();
        self.images_failed += report.failed();
    }
}

/// The result of converting one item.
#[derive(Debug)]
pub struct ItemReport {
    pub path: PathBuf,
    pub images: FetchReport,
}

/// Turns exported items into standalone HTML files, one item at a time.
pub struct Converter {
    config: ConvertConfig,
    files: FileManager,
    pool: ImagePool,
    patcher: Option<SitePatcher>,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ConvertConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.offline {
            ensure_images_dir(&config.images_dir)?;
        }
        let files = FileManager::new(&config.output_dir)?;
        let pool = ImagePool::from_config(transport, &config);
        let patcher = if config.site_rules {
            Some(SitePatcher::new(&config)?)
        } else {
            None
        };

        Ok(Self {
            config,
            files,
            pool,
            patcher,
        })
    }

    pub async fn execute(&self, paths: &[PathBuf]) -> Result<ConvertSummary> {
        if paths.is_empty() {
            bail!("no json given");
        }

        let mut summary = ConvertSummary::default();
        for path in paths {
            self.convert_file(path, &mut summary).await;
        }
        Ok(summary)
    }

    async fn convert_file(&self, path: &Path, summary: &mut ConvertSummary) {
        info!("processing {}", path.display());

        let starred = match Starred::open(path) {
            Ok(starred) => starred,
            Err(err) => {
                error!("{:#}", err);
                summary.files_failed += 1;
                return;
            }
        };

        for item in &starred.items {
            info!("processing {}", item.title);
            match self.convert_item(item).await {
                Ok(report) => {
                    summary.items_converted += 1;
                    summary.record_images(&report.images);
                }
                Err(err) => {
                    warn!(title = %item.title, "cannot convert item: {:#}", err);
                    summary.items_failed += 1;
                }
            }
        }
    }

    /// Converts a single item and writes its HTML file.
    ///
    /// The page stays on this task while images are fetched; the pool only
    /// ever sees the extracted references, and rewriting starts after every
    /// fetch has finished.
    pub async fn convert_item(&self, item: &Item) -> Result<ItemReport> {
        let body = match &self.patcher {
            Some(patcher) => patcher.summary_for(item).await,
            None => item.summary.content.clone(),
        };

        let page = Page::parse(&item.patched_content(&body));
        clean_page(&page);

        let images = if self.config.offline {
            let refs = extract_image_refs(&page, &self.config.images_dir);
            let report = self.pool.fetch_all(refs).await;
            let rewritten = rewrite_images(&page, &report);
            debug!(rewritten, "image references replaced");
            report
        } else {
            FetchReport::default()
        };

        page.ensure_title(&item.title);
        let html = page.to_html()?;

        let path = self.files.save_html(item, &html)?;
        debug!("save {}", path.display());

        Ok(ItemReport { path, images })
    }
}
