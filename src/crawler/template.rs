//! Web template crawler: fetches seed pages and their static resources,
//! then packages everything into a zip archive

use crate::crawler::archive::zip_dir;
use crate::crawler::{CrawlRequest, CrawlerAdapter, CrawlerConfig};
use crate::error::{Result, SpiderError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use scraper::{Html, Selector};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_ENCODING: &str = "utf-8";
const MANIFEST_FILE: &str = "manifest.json";

/// Links found on one page
#[derive(Debug, Default, PartialEq)]
struct PageLinks {
    /// Stylesheets, scripts and images
    resources: Vec<Url>,
    /// Anchors, followed in full-site mode
    pages: Vec<Url>,
}

#[derive(Debug, Serialize)]
struct SavedFile {
    url: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    task_id: &'a str,
    seeds: &'a [String],
    to_framework: Option<&'a str>,
    ref_model: bool,
    to_single_page: bool,
    full_site: bool,
    encoding: &'a str,
    pages: Vec<SavedFile>,
    resources: Vec<SavedFile>,
    generated_at: String,
}

/// Default [`CrawlerAdapter`] built on reqwest and scraper
pub struct TemplateCrawler {
    client: Client,
    config: CrawlerConfig,
}

impl TemplateCrawler {
    /// Create a new crawler instance with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler instance with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| SpiderError::FetchError {
                url: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self { client, config })
    }

    /// Run `op` with exponential backoff until it succeeds, a non-retryable
    /// client error comes back, or the retries run out
    async fn with_retry<T, F, Fut>(&self, url: &str, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(SpiderError::Cancelled);
            }

            if attempt > 0 {
                let delay = std::cmp::min(
                    self.config.retry_base_delay * 2u32.saturating_pow(attempt - 1),
                    self.config.retry_max_delay,
                );
                warn!(
                    "Retry attempt {}/{} for {} after {:?}",
                    attempt, self.config.max_retries, url, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SpiderError::Cancelled),
                    _ = sleep(delay) => {}
                }
            }

            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!("Successfully fetched {} on attempt {}", url, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Fetch attempt {} failed for {}: {}", attempt + 1, url, last_error);

                    // Don't retry on client errors (4xx) except 429 (rate limit)
                    if let SpiderError::HttpStatusError { status, .. } = &e {
                        if (400..500).contains(status) && *status != 429 {
                            return Err(e);
                        }
                    }
                }
            }
        }

        Err(SpiderError::RetryExhausted {
            url: url.to_string(),
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }

    /// Single request without retry
    async fn send(&self, url: &str, headers: &HeaderMap) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| SpiderError::FetchError {
                url: url.to_string(),
                source: e,
            })?;

        // Check for HTTP errors (4xx, 5xx)
        let status = response.status();
        if !status.is_success() {
            return Err(SpiderError::HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    async fn fetch_page(
        &self,
        url: &str,
        headers: &HeaderMap,
        encoding: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.with_retry(url, cancel, || async move {
            let response = self.send(url, headers).await?;
            response
                .text_with_charset(encoding)
                .await
                .map_err(|e| SpiderError::FetchError {
                    url: url.to_string(),
                    source: e,
                })
        })
        .await
    }

    async fn fetch_bytes(
        &self,
        url: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.with_retry(url, cancel, || async move {
            let response = self.send(url, headers).await?;
            let bytes = response.bytes().await.map_err(|e| SpiderError::FetchError {
                url: url.to_string(),
                source: e,
            })?;
            Ok::<_, SpiderError>(bytes.to_vec())
        })
        .await
    }

    async fn run(&self, request: &CrawlRequest, cancel: &CancellationToken) -> Result<PathBuf> {
        let headers = header_map(request);
        let encoding = request
            .options
            .encoding
            .as_deref()
            .unwrap_or(DEFAULT_ENCODING)
            .to_string();

        // Start clean: a previous attempt at this task may have left files
        if tokio::fs::try_exists(&request.work_dir).await? {
            tokio::fs::remove_dir_all(&request.work_dir).await?;
        }
        tokio::fs::create_dir_all(&request.work_dir).await?;

        let seeds: Vec<Url> = request
            .seeds
            .iter()
            .filter_map(|s| match Url::parse(s) {
                Ok(url) => Some(url),
                Err(_) => {
                    warn!("Skipping invalid seed {} for task {}", s, request.task_id);
                    None
                }
            })
            .take(if request.options.to_single_page { 1 } else { usize::MAX })
            .collect();
        if seeds.is_empty() {
            return Err(SpiderError::NoSeeds(request.task_id.clone()));
        }
        let seed_hosts: HashSet<String> = seeds
            .iter()
            .filter_map(|u| u.host_str().map(str::to_string))
            .collect();

        let mut queue: VecDeque<Url> = seeds.into_iter().collect();
        let mut visited: HashSet<Url> = HashSet::new();
        let mut fetched_resources: HashSet<Url> = HashSet::new();
        let mut pages = Vec::new();
        let mut resources = Vec::new();
        let mut last_error = None;

        while let Some(page_url) = queue.pop_front() {
            if pages.len() >= self.config.max_pages {
                debug!("Page limit {} reached for task {}", self.config.max_pages, request.task_id);
                break;
            }
            if !visited.insert(without_fragment(&page_url)) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(SpiderError::Cancelled);
            }

            let html = match self
                .fetch_page(page_url.as_str(), &headers, &encoding, cancel)
                .await
            {
                Ok(html) => html,
                Err(SpiderError::Cancelled) => return Err(SpiderError::Cancelled),
                Err(e) => {
                    warn!("Giving up on page {}: {}", page_url, e);
                    last_error = Some(e);
                    continue;
                }
            };

            let relative = local_path(&page_url, true);
            write_file(&request.work_dir, &relative, html.as_bytes()).await?;
            pages.push(SavedFile {
                url: page_url.to_string(),
                path: relative.to_string_lossy().into_owned(),
            });

            let links = extract_links(&html, &page_url);

            for resource in links
                .resources
                .into_iter()
                .filter(|u| request.options.grab_out_site_link || same_site(u, &seed_hosts))
                .take(self.config.max_resources_per_page)
            {
                if !fetched_resources.insert(resource.clone()) {
                    continue;
                }
                match self.fetch_bytes(resource.as_str(), &headers, cancel).await {
                    Ok(bytes) => {
                        let relative = local_path(&resource, false);
                        write_file(&request.work_dir, &relative, &bytes).await?;
                        resources.push(SavedFile {
                            url: resource.to_string(),
                            path: relative.to_string_lossy().into_owned(),
                        });
                    }
                    Err(SpiderError::Cancelled) => return Err(SpiderError::Cancelled),
                    Err(e) => warn!("Skipping resource {}: {}", resource, e),
                }
            }

            if request.options.full_site && !request.options.to_single_page {
                queue.extend(
                    links
                        .pages
                        .into_iter()
                        .filter(|u| same_site(u, &seed_hosts)),
                );
            }
        }

        if pages.is_empty() {
            return Err(last_error.unwrap_or_else(|| SpiderError::NoSeeds(request.task_id.clone())));
        }

        info!(
            "Task {}: saved {} pages and {} resources",
            request.task_id,
            pages.len(),
            resources.len()
        );

        let manifest = Manifest {
            task_id: &request.task_id,
            seeds: &request.seeds,
            to_framework: request.options.to_framework.as_deref(),
            ref_model: request.options.ref_model,
            to_single_page: request.options.to_single_page,
            full_site: request.options.full_site,
            encoding: &encoding,
            pages,
            resources,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        write_file(&request.work_dir, Path::new(MANIFEST_FILE), &manifest_json).await?;

        if cancel.is_cancelled() {
            return Err(SpiderError::Cancelled);
        }

        let work_dir = request.work_dir.clone();
        let archive_path = request.archive_path();
        let archive = tokio::task::spawn_blocking(move || zip_dir(&work_dir, &archive_path))
            .await
            .map_err(|e| SpiderError::IoError(e.to_string()))??;

        Ok(archive)
    }
}

#[async_trait]
impl CrawlerAdapter for TemplateCrawler {
    async fn crawl(&self, request: CrawlRequest, cancel: CancellationToken) -> Result<PathBuf> {
        info!(
            "Crawling {} seeds for task {} (out-site links: {}, full site: {})",
            request.seeds.len(),
            request.task_id,
            request.options.grab_out_site_link,
            request.options.full_site
        );
        self.run(&request, &cancel).await
    }
}

fn header_map(request: &CrawlRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping invalid request header {}", name),
        }
    }
    headers
}

async fn write_file(root: &Path, relative: &Path, contents: &[u8]) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, contents).await?;
    Ok(())
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

fn same_site(url: &Url, seed_hosts: &HashSet<String>) -> bool {
    url.host_str().map(|h| seed_hosts.contains(h)).unwrap_or(false)
}

/// Collect resource and page links from an HTML document, resolved against `base`
fn extract_links(html: &str, base: &Url) -> PageLinks {
    let document = Html::parse_document(html);
    let mut links = PageLinks::default();

    let resource_selectors = [
        ("link[rel~='stylesheet'][href]", "href"),
        ("link[rel~='icon'][href]", "href"),
        ("script[src]", "src"),
        ("img[src]", "src"),
    ];

    for (selector_str, attr) in resource_selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            for el in document.select(&selector) {
                if let Some(url) = el.value().attr(attr).and_then(|href| resolve(base, href)) {
                    links.resources.push(url);
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("a[href]") {
        for el in document.select(&selector) {
            if let Some(url) = el.value().attr("href").and_then(|href| resolve(base, href)) {
                links.pages.push(without_fragment(&url));
            }
        }
    }

    links.resources.dedup();
    links.pages.dedup();
    links
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("data:")
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }

    base.join(href)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Map a URL to a path inside the working directory: `<host>/<path>`, with
/// unsafe characters replaced and the query folded into a short hash.
fn local_path(url: &Url, is_page: bool) -> PathBuf {
    let mut path = PathBuf::from(sanitize_segment(url.host_str().unwrap_or("unknown")));

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..").collect())
        .unwrap_or_default();

    let (dirs, file) = match segments.split_last() {
        Some((last, dirs)) if !url.path().ends_with('/') => (dirs.to_vec(), Some(*last)),
        _ => (segments.clone(), None),
    };

    for dir in dirs {
        path.push(sanitize_segment(dir));
    }

    let mut file_name = match file {
        Some(name) => sanitize_segment(name),
        None if is_page => "index.html".to_string(),
        None => "index".to_string(),
    };

    if let Some(query) = url.query() {
        let suffix = format!("_{}", query_hash(query));
        match file_name.rfind('.') {
            Some(dot) => file_name.insert_str(dot, &suffix),
            None => file_name.push_str(&suffix),
        }
    }

    if is_page && !file_name.contains('.') {
        file_name.push_str(".html");
    }

    path.push(file_name);
    path
}

/// Query hash (SHA256, first 8 chars)
fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
