use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ConvertConfig;
use crate::error::FetchError;
use crate::html_parser::ImageRef;

/// Status line and body stream of a GET.
pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

/// The network side of the image pool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Remote size as reported by a HEAD request.
    async fn probe(&self, url: &str) -> Result<Option<u64>, FetchError>;

    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ConvertConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(config.user_agent.as_str())
            .timeout(config.fetch_timeout)
            .build()?;

        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                status: response.status().as_u16(),
            });
        }

        // reqwest reports the length of the (empty) HEAD body, so read the header.
        let length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        Ok(length)
    }

    async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let owned_url = url.to_string();
        Ok(FetchResponse {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: response
                .bytes_stream()
                .map(move |chunk| chunk.map_err(|e| FetchError::network(&owned_url, e)))
                .boxed(),
        })
    }
}

#[derive(Debug)]
pub enum FetchStatus {
    /// The local copy already matches the remote size.
    Skipped,
    Downloaded,
    Failed(FetchError),
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub image: ImageRef,
    pub status: FetchStatus,
}

impl FetchOutcome {
    /// Whether the local file may be referenced from the document.
    pub fn is_usable(&self) -> bool {
        matches!(self.status, FetchStatus::Skipped | FetchStatus::Downloaded)
    }
}

/// One outcome per submitted image, keyed by source URL.
#[derive(Debug, Default)]
pub struct FetchReport {
    outcomes: HashMap<String, FetchOutcome>,
}

impl FetchReport {
    pub fn get(&self, source_url: &str) -> Option<&FetchOutcome> {
        self.outcomes.get(source_url)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn downloaded(&self) -> usize {
        self.count(|s| matches!(s, FetchStatus::Downloaded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FetchStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FetchStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&FetchStatus) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(&o.status)).count()
    }

    fn insert(&mut self, outcome: FetchOutcome) {
        self.outcomes.insert(outcome.image.source_url.clone(), outcome);
    }
}

impl FromIterator<FetchOutcome> for FetchReport {
    fn from_iter<I: IntoIterator<Item = FetchOutcome>>(iter: I) -> Self {
        let mut report = Self::default();
        for outcome in iter {
            report.insert(outcome);
        }
        report
    }
}

/// Mirrors a document's images with a bounded number of concurrent fetches.
pub struct ImagePool {
    transport: Arc<dyn Transport>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    progress: Option<MultiProgress>,
}

impl ImagePool {
    pub fn new(transport: Arc<dyn Transport>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            transport,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            progress: None,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &ConvertConfig) -> Self {
        let pool = Self::new(transport, config.max_concurrent, config.fetch_timeout);
        if config.verbose {
            pool.with_progress(MultiProgress::new())
        } else {
            pool
        }
    }

    /// Draws a byte progress bar per image while it downloads.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Fetches every image and never fails as a whole: each image gets
    /// exactly one outcome in the report.
    pub async fn fetch_all(&self, images: Vec<ImageRef>) -> FetchReport {
        let mut tasks = JoinSet::new();
        let mut report = FetchReport::default();

        for image in images.iter().cloned() {
            // Acquire before spawning so no more than the limit are ever in flight.
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    report.insert(FetchOutcome {
                        image,
                        status: FetchStatus::Failed(FetchError::TaskAborted(
                            "semaphore closed".to_string(),
                        )),
                    });
                    continue;
                }
            };

            let transport = self.transport.clone();
            let timeout = self.timeout;
            let bar = self.progress_bar(&image);

            tasks.spawn(async move {
                let _permit = permit;
                debug!(url = %image.source_url, "downloading");

                let status = match tokio::time::timeout(
                    timeout,
                    materialize(transport.as_ref(), &image, bar.as_ref()),
                )
                .await
                {
                    Ok(Ok(status)) => status,
                    Ok(Err(err)) => FetchStatus::Failed(err),
                    Err(_) => FetchStatus::Failed(FetchError::Timeout { after: timeout }),
                };

                if let Some(bar) = bar {
                    bar.finish_and_clear();
                }
                FetchOutcome { image, status }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    report.insert(outcome);
                }
                Err(err) => warn!(error = %err, "image task did not complete"),
            }
        }

        // A panicked task leaves no outcome behind; record it as failed.
        for image in images {
            if report.get(&image.source_url).is_none() {
                let outcome = FetchOutcome {
                    image,
                    status: FetchStatus::Failed(FetchError::TaskAborted("task panicked".to_string())),
                };
                log_outcome(&outcome);
                report.insert(outcome);
            }
        }

        report
    }

    fn progress_bar(&self, image: &ImageRef) -> Option<ProgressBar> {
        let progress = self.progress.as_ref()?;
        let bar = progress.add(ProgressBar::new(0));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg:30!} |{bar:10.cyan/blue}| {bytes}/{total_bytes}")
        {
            bar.set_style(style.progress_chars("=>."));
        }
        let name = image
            .source_url
            .rsplit('/')
            .next()
            .unwrap_or(image.source_url.as_str())
            .to_string();
        bar.set_message(name);
        Some(bar)
    }
}

fn log_outcome(outcome: &FetchOutcome) {
    let url = outcome.image.source_url.as_str();
    let path = outcome.image.local_path.display();
    match &outcome.status {
        FetchStatus::Downloaded => info!(url, path = %path, "done"),
        FetchStatus::Skipped => info!(url, path = %path, "skip"),
        FetchStatus::Failed(err) => warn!(url, "fail: {}", err),
    }
}

/// Makes the image available at its local path, or explains why not.
async fn materialize(
    transport: &dyn Transport,
    image: &ImageRef,
    bar: Option<&ProgressBar>,
) -> Result<FetchStatus, FetchError> {
    let url = image.source_url.as_str();

    if let Ok(meta) = tokio::fs::metadata(&image.local_path).await {
        let local_len = meta.len();
        if meta.is_file() && local_len > 0 {
            match transport.probe(url).await {
                Ok(Some(remote_len)) if remote_len == local_len => return Ok(FetchStatus::Skipped),
                Ok(_) => {}
                Err(err) => debug!(url, error = %err, "probe failed, fetching in full"),
            }
        }
    }

    let mut response = transport.get(url).await?;
    if !(200..=299).contains(&response.status) {
        return Err(FetchError::HttpStatus {
            status: response.status,
        });
    }

    if let (Some(bar), Some(len)) = (bar, response.content_length) {
        bar.set_length(len);
    }

    let path = image.local_path.as_path();
    let file = File::create(path)
        .await
        .map_err(|e| FetchError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut written: u64 = 0;

    while let Some(chunk) = response.body.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(path, e))?;
        written += chunk.len() as u64;
        if let Some(bar) = bar {
            bar.inc(chunk.len() as u64);
        }
    }
    writer.flush().await.map_err(|e| FetchError::io(path, e))?;

    check_written(response.content_length, written)?;
    Ok(FetchStatus::Downloaded)
}

fn check_written(expected: Option<u64>, written: u64) -> Result<(), FetchError> {
    match expected {
        Some(expected) if written < expected => Err(FetchError::SizeMismatch { expected, written }),
        _ if written == 0 => Err(FetchError::EmptyBody),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::path::Path;
    use tempfile::tempdir;

    fn image(dir: &Path, name: &str) -> ImageRef {
        ImageRef {
            source_url: format!("https://example.com/{}", name),
            local_path: dir.join(name),
        }
    }

    fn response(status: u16, content_length: Option<u64>, chunks: &[&'static str]) -> FetchResponse {
        let chunks: Vec<Result<Bytes, FetchError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        FetchResponse {
            status,
            content_length,
            body: stream::iter(chunks).boxed(),
        }
    }

    fn pool(transport: MockTransport) -> ImagePool {
        ImagePool::new(Arc::new(transport), 3, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");

        let mut transport = MockTransport::new();
        transport.expect_probe().times(0);
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(response(200, Some(5), &["he", "llo"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;

        let outcome = report.get(&img.source_url).unwrap();
        assert!(matches!(outcome.status, FetchStatus::Downloaded));
        assert_eq!(std::fs::read(&img.local_path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_matching_probe_skips_transfer() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");
        std::fs::write(&img.local_path, b"12345").unwrap();

        let mut transport = MockTransport::new();
        transport.expect_probe().times(1).returning(|_| Ok(Some(5)));
        transport.expect_get().times(0);

        let report = pool(transport).fetch_all(vec![img.clone()]).await;

        assert!(matches!(report.get(&img.source_url).unwrap().status, FetchStatus::Skipped));
        assert_eq!(report.skipped(), 1);
    }

    #[tokio::test]
    async fn test_size_change_refetches() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");
        std::fs::write(&img.local_path, b"old").unwrap();

        let mut transport = MockTransport::new();
        transport.expect_probe().times(1).returning(|_| Ok(Some(6)));
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(response(200, Some(6), &["newer!"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;

        assert_eq!(report.downloaded(), 1);
        assert_eq!(std::fs::read(&img.local_path).unwrap(), b"newer!");
    }

    #[tokio::test]
    async fn test_probe_error_falls_through_to_get() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");
        std::fs::write(&img.local_path, b"12345").unwrap();

        let mut transport = MockTransport::new();
        transport
            .expect_probe()
            .returning(|_| Err(FetchError::HttpStatus { status: 405 }));
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(response(200, None, &["abc"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;
        assert_eq!(report.downloaded(), 1);
    }

    #[tokio::test]
    async fn test_truncated_body_is_failure() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");

        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .returning(|_| Ok(response(200, Some(100), &["only a little"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;

        match &report.get(&img.source_url).unwrap().status {
            FetchStatus::Failed(FetchError::SizeMismatch { expected, written }) => {
                assert_eq!(*expected, 100);
                assert_eq!(*written, 13);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_unknown_length_is_failure() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");

        let mut transport = MockTransport::new();
        transport.expect_get().returning(|_| Ok(response(200, None, &[])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;
        assert!(matches!(
            report.get(&img.source_url).unwrap().status,
            FetchStatus::Failed(FetchError::EmptyBody)
        ));
    }

    #[tokio::test]
    async fn test_http_error_does_not_touch_existing_file() {
        let dir = tempdir().unwrap();
        let img = image(dir.path(), "a.jpg");
        std::fs::write(&img.local_path, b"keep me").unwrap();

        let mut transport = MockTransport::new();
        transport.expect_probe().returning(|_| Ok(None));
        transport.expect_get().returning(|_| Ok(response(404, Some(9), &["not found"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;

        assert!(matches!(
            report.get(&img.source_url).unwrap().status,
            FetchStatus::Failed(FetchError::HttpStatus { status: 404 })
        ));
        assert_eq!(std::fs::read(&img.local_path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_failure() {
        let dir = tempdir().unwrap();
        let img = ImageRef {
            source_url: "https://example.com/a.jpg".to_string(),
            local_path: dir.path().join("missing-dir").join("a.jpg"),
        };

        let mut transport = MockTransport::new();
        transport.expect_get().returning(|_| Ok(response(200, Some(1), &["x"])));

        let report = pool(transport).fetch_all(vec![img.clone()]).await;
        assert!(matches!(
            report.get(&img.source_url).unwrap().status,
            FetchStatus::Failed(FetchError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let dir = tempdir().unwrap();
        let good = image(dir.path(), "good.png");
        let bad = image(dir.path(), "bad.png");

        let mut transport = MockTransport::new();
        transport.expect_get().returning(|url| {
            if url.ends_with("bad.png") {
                Err(FetchError::network(
                    url,
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
                ))
            } else {
                Ok(response(200, Some(2), &["ok"]))
            }
        });

        let report = pool(transport).fetch_all(vec![good.clone(), bad.clone()]).await;

        assert_eq!(report.len(), 2);
        assert!(report.get(&good.source_url).unwrap().is_usable());
        assert!(!report.get(&bad.source_url).unwrap().is_usable());
    }

    #[test]
    fn test_check_written() {
        assert!(check_written(Some(10), 10).is_ok());
        assert!(check_written(None, 3).is_ok());
        assert!(matches!(check_written(Some(10), 4), Err(FetchError::SizeMismatch { .. })));
        assert!(matches!(check_written(None, 0), Err(FetchError::EmptyBody)));
        assert!(matches!(check_written(Some(0), 0), Err(FetchError::EmptyBody)));
    }
}
