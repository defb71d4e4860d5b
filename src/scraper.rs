use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ScraperConfig, SearchQuery};
use crate::store::RawStore;

const USER_AGENT: &str = concat!("elbil/", env!("CARGO_PKG_VERSION"));

static FINNKODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"finnkode=(\d+)").unwrap());
static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/item/(\d+)").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static NEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#".icon--chevron-right, a[rel="next"]"#).unwrap());

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Rate limiting, server errors and connection trouble are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            FetchError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_body()
            }
        }
    }
}

/// Fetch stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchStats {
    pub queries: usize,
    pub failed_queries: usize,
    pub found: usize,
    pub skipped: usize,
    pub saved: usize,
    pub errors: usize,
}

impl FetchStats {
    pub fn print(&self) {
        println!(
            "Saved {} new ads ({} found, {} already stored, {} errors, {}/{} queries failed).",
            self.saved, self.found, self.skipped, self.errors, self.failed_queries, self.queries,
        );
    }
}

/// One listing page: the ad identifiers on it and whether a next page exists.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub codes: Vec<u64>,
    pub has_next: bool,
}

pub struct Fetcher {
    client: reqwest::Client,
    cfg: ScraperConfig,
}

impl Fetcher {
    pub fn new(cfg: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            cfg: cfg.clone(),
        })
    }

    /// Crawl every query in order, saving ads not yet in `store`.
    ///
    /// A query whose listing cannot be fetched is logged and skipped; the next
    /// run picks up whatever is still missing.
    pub async fn fetch_all(&self, store: &RawStore, queries: &[SearchQuery]) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        for query in queries {
            stats.queries += 1;
            if let Err(e) = self.fetch_query(store, query, &mut stats).await {
                stats.failed_queries += 1;
                warn!("Query {} failed: {:#}", query.name, e);
            }
        }
        info!(
            "Fetched {} queries ({} failed): {} ads found, {} new saved, {} skipped, {} errors",
            stats.queries, stats.failed_queries, stats.found, stats.saved, stats.skipped, stats.errors
        );
        Ok(stats)
    }

    async fn fetch_query(
        &self,
        store: &RawStore,
        query: &SearchQuery,
        stats: &mut FetchStats,
    ) -> Result<()> {
        info!("Searching {} (code {})", query.name, query.code);
        let saved = store.saved_codes()?;
        let codes = self.collect_ad_codes(query).await?;
        let new_codes: Vec<u64> = codes.iter().copied().filter(|c| !saved.contains(c)).collect();

        stats.found += codes.len();
        stats.skipped += codes.len() - new_codes.len();
        let total = saved.len() + new_codes.len();
        println!("{}: found {} new ads, total {}", query.name, new_codes.len(), total);

        if new_codes.is_empty() {
            return Ok(());
        }

        let pb = ProgressBar::new(new_codes.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        for code in new_codes {
            let url = format!("{}{}", self.cfg.ad_url, code);
            match self.get_with_retry(&url).await {
                Ok(body) => {
                    store.save(code, &body)?;
                    stats.saved += 1;
                }
                Err(e) => {
                    warn!("Failed to fetch ad {}: {}", code, e);
                    stats.errors += 1;
                }
            }
            pb.inc(1);
            if self.cfg.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.request_delay_ms)).await;
            }
        }

        pb.finish_and_clear();
        Ok(())
    }

    /// Walk listing pages until a page brings nothing new, pagination ends, or
    /// `max_pages` is hit. Identifiers come back in first-seen order. Only a
    /// failure on the first page fails the query.
    pub async fn collect_ad_codes(&self, query: &SearchQuery) -> Result<Vec<u64>, FetchError> {
        let mut seen = HashSet::new();
        let mut codes = Vec::new();

        for page in 1..=self.cfg.max_pages {
            let url = listing_url(&self.cfg.search_url, query, page);
            let body = match self.get_with_retry(&url).await {
                Ok(body) => body,
                // Later pages only cut the crawl short; what was found so far is kept.
                Err(e) if page > 1 => {
                    warn!("{} page {} failed, keeping {} ids: {}", query.name, page, codes.len(), e);
                    break;
                }
                Err(e) => return Err(e),
            };
            let listing = parse_listing(&body);
            let fresh: Vec<u64> = listing.codes.into_iter().filter(|c| seen.insert(*c)).collect();
            debug!("{} page {}: {} new ids", query.name, page, fresh.len());

            if fresh.is_empty() {
                break;
            }
            codes.extend(fresh);
            if !listing.has_next {
                break;
            }
        }

        Ok(codes)
    }

    async fn get_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.cfg.max_retries => {
                    let backoff = backoff_delay(&self.cfg, attempt);
                    warn!(
                        "{} (attempt {}/{}), backing off {:.1}s",
                        e,
                        attempt + 1,
                        self.cfg.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let request_err = |source: reqwest::Error| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }
        response.text().await.map_err(request_err)
    }
}

/// `{search_url}{code}[&year_from=..][&year_to=..]&page=N`
pub fn listing_url(search_url: &str, query: &SearchQuery, page: u32) -> String {
    let mut url = format!("{}{}", search_url, query.code);
    if let Some(from) = query.years.year_from {
        url.push_str(&format!("&year_from={}", from));
    }
    if let Some(to) = query.years.year_to {
        url.push_str(&format!("&year_to={}", to));
    }
    url.push_str(&format!("&page={}", page));
    url
}

/// Pull ad identifiers and the next-page marker out of a search result page.
pub fn parse_listing(html: &str) -> ListingPage {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    for a in doc.select(&LINK_SEL) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let caps = FINNKODE_RE.captures(href).or_else(|| ITEM_RE.captures(href));
        if let Some(code) = caps.and_then(|c| c[1].parse::<u64>().ok()) {
            if seen.insert(code) {
                codes.push(code);
            }
        }
    }

    let has_next = doc.select(&NEXT_SEL).next().is_some();
    ListingPage { codes, has_next }
}

fn backoff_delay(cfg: &ScraperConfig, attempt: u32) -> Duration {
    let ms = cfg
        .base_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(cfg.max_backoff_ms);
    Duration::from_millis(ms)
}
