//! Headless browser page fetching.
//!
//! [`BrowserSession`] owns a Chromium process driven through chromiumoxide.
//! [`SelectorFetcher`] implements [`PageFetcher`] on top of it: each fetch opens
//! one tab, waits for the kind's ready selector, reads the HTML and closes the
//! tab again on every path out.

use std::sync::Arc;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures_util::StreamExt;
use harvest_core::{AppConfig, FetchFailure, Payload, WaitCondition};
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use crate::extract::{ExtractionRules, classify_page, extract_fields, parse_selector};
use crate::fetcher::PageFetcher;
use crate::request::{SearchEndpoint, Target};

/// Options for launching the browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Viewport dimensions (default: 1280x720).
    pub viewport: (u32, u32),
    pub user_agent: Option<String>,
    /// Extra command-line switches passed to Chromium.
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: (1280, 720),
            user_agent: None,
            args: vec!["--no-sandbox".into(), "--disable-dev-shm-usage".into()],
        }
    }
}

impl BrowserOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { headless: config.headless, ..Default::default() }
    }
}

/// HTML and final address of a rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    /// URL after redirects.
    pub final_url: Url,
}

fn map_cdp(err: CdpError) -> FetchFailure {
    match &err {
        CdpError::Timeout => FetchFailure::timeout(err.to_string()),
        CdpError::NotFound | CdpError::FrameNotFound(_) => FetchFailure::stale_reference(err.to_string()),
        _ => FetchFailure::unavailable(err.to_string()),
    }
}

/// A running browser. Dropping the session aborts its event loop; call
/// [`close`](Self::close) to shut Chromium down cleanly.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    /// Launch Chromium and spawn the task that drives its DevTools events.
    pub async fn launch(options: BrowserOptions) -> Result<Self, FetchFailure> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport.0, options.viewport.1)
            .args(options.args.iter().map(String::as_str));
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(agent) = &options.user_agent {
            builder = builder.arg(format!("--user-agent={agent}"));
        }
        let config = builder.build().map_err(FetchFailure::unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchFailure::unavailable(format!("browser launch failed: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                    break;
                }
            }
        });

        tracing::info!(headless = options.headless, "browser launched");
        Ok(Self { browser, handler })
    }

    /// Open `url` in a new tab and return its HTML once `rules.ready_selector` matches.
    pub async fn render(
        &self, url: &Url, wait: &WaitCondition, rules: &ExtractionRules,
    ) -> Result<RenderedPage, FetchFailure> {
        parse_selector(&rules.ready_selector)?;

        let page = self.browser.new_page(url.as_str()).await.map_err(map_cdp)?;
        let result = read_when_ready(&page, url, wait, rules).await;
        if let Err(e) = page.close().await {
            tracing::debug!(url = %url, "failed to close tab: {e}");
        }
        result
    }

    pub async fn close(mut self) -> Result<(), FetchFailure> {
        self.browser.close().await.map_err(map_cdp)?;
        self.browser.wait().await.map_err(|e| FetchFailure::unavailable(e.to_string()))?;
        tracing::info!("browser closed");
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn current_url(page: &Page) -> Result<Option<Url>, FetchFailure> {
    Ok(page.url().await.map_err(map_cdp)?.and_then(|u| Url::parse(&u).ok()))
}

async fn read_when_ready(
    page: &Page, url: &Url, wait: &WaitCondition, rules: &ExtractionRules,
) -> Result<RenderedPage, FetchFailure> {
    wait.wait_for(&rules.ready_selector, move || async move {
        if let Some(current) = current_url(page).await?
            && rules.auth_markers.iter().any(|m| current.as_str().contains(m.as_str()))
        {
            return Err(FetchFailure::auth_required(format!("redirected to {current}")));
        }
        if let Some(selector) = &rules.not_found_selector
            && page.find_element(selector.as_str()).await.is_ok()
        {
            return Err(FetchFailure::not_found(format!("{url} shows a not-found page")));
        }
        Ok(page.find_element(rules.ready_selector.as_str()).await.is_ok())
    })
    .await?;

    let html = page.content().await.map_err(map_cdp)?;
    let final_url = current_url(page).await?.unwrap_or_else(|| url.clone());
    Ok(RenderedPage { html, final_url })
}

/// Rules applied to URLs containing `url_contains`.
#[derive(Debug, Clone)]
pub struct PageRoute {
    pub url_contains: String,
    pub rules: ExtractionRules,
}

/// [`PageFetcher`] that renders pages in a shared browser and extracts
/// fields with per-route CSS rules.
pub struct SelectorFetcher {
    session: Arc<BrowserSession>,
    routes: Vec<PageRoute>,
    search: Option<(SearchEndpoint, ExtractionRules)>,
}

impl SelectorFetcher {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session, routes: Vec::new(), search: None }
    }

    /// Add a route; the first route whose pattern the URL contains wins.
    pub fn route(mut self, url_contains: impl Into<String>, rules: ExtractionRules) -> Self {
        self.routes.push(PageRoute { url_contains: url_contains.into(), rules });
        self
    }

    /// Enable search targets.
    pub fn search(mut self, endpoint: SearchEndpoint, rules: ExtractionRules) -> Self {
        self.search = Some((endpoint, rules));
        self
    }

    fn resolve(&self, target: &Target) -> Result<(Url, &ExtractionRules), FetchFailure> {
        match target {
            Target::Url(url) => select_route(&self.routes, url)
                .map(|rules| (url.clone(), rules))
                .ok_or_else(|| FetchFailure::malformed(format!("no extraction rules for {url}"))),
            Target::Search(query) => self
                .search
                .as_ref()
                .map(|(endpoint, rules)| (endpoint.url_for(query), rules))
                .ok_or_else(|| FetchFailure::malformed("no search endpoint configured")),
        }
    }
}

fn select_route<'a>(routes: &'a [PageRoute], url: &Url) -> Option<&'a ExtractionRules> {
    routes
        .iter()
        .find(|route| url.as_str().contains(route.url_contains.as_str()))
        .map(|route| &route.rules)
}

#[async_trait::async_trait]
impl PageFetcher for SelectorFetcher {
    async fn fetch(&self, target: &Target, wait: &WaitCondition) -> Result<Payload, FetchFailure> {
        let (url, rules) = self.resolve(target)?;
        let page = self.session.render(&url, wait, rules).await?;
        classify_page(&page.html, &page.final_url, rules)?;

        let mut payload = extract_fields(&page.html, &page.final_url, rules)?;
        if !payload.is_empty() {
            payload.entry("url".to_string()).or_insert_with(|| Value::String(url.to_string()));
        }
        tracing::debug!(url = %url, fields = payload.len(), "page extracted");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldRule;
    use harvest_core::FailureKind;
    use std::time::Duration;

    fn routes() -> Vec<PageRoute> {
        vec![
            PageRoute { url_contains: "/jobs/view/".into(), rules: ExtractionRules::new("h1.job-title") },
            PageRoute { url_contains: "/in/".into(), rules: ExtractionRules::new("h1.text-heading-xlarge") },
        ]
    }

    #[test]
    fn test_select_route() {
        let routes = routes();
        let job = Url::parse("https://example.com/jobs/view/123").unwrap();
        let profile = Url::parse("https://example.com/in/jane").unwrap();
        let other = Url::parse("https://example.com/feed").unwrap();

        assert_eq!(select_route(&routes, &job).unwrap().ready_selector, "h1.job-title");
        assert_eq!(select_route(&routes, &profile).unwrap().ready_selector, "h1.text-heading-xlarge");
        assert!(select_route(&routes, &other).is_none());
    }

    #[test]
    fn test_map_cdp_errors() {
        assert_eq!(map_cdp(CdpError::Timeout).kind, FailureKind::Timeout);
        assert_eq!(map_cdp(CdpError::NotFound).kind, FailureKind::StaleReference);
        assert_eq!(map_cdp(CdpError::NoResponse).kind, FailureKind::Unavailable);
    }

    #[tokio::test]
    #[ignore = "requires Chrome/Chromium installation"]
    async fn test_browser_session_launch() {
        let session = BrowserSession::launch(BrowserOptions::default()).await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires network and Chrome/Chromium"]
    async fn test_selector_fetcher_example_page() {
        let session = Arc::new(BrowserSession::launch(BrowserOptions::default()).await.unwrap());
        let fetcher = SelectorFetcher::new(session).route(
            "example.com",
            ExtractionRules::new("h1").field(FieldRule::text("title", "h1")),
        );
        let wait = WaitCondition::new(Duration::from_secs(20), Duration::from_millis(250));

        let payload = fetcher.fetch(&Target::url("https://example.com").unwrap(), &wait).await.unwrap();
        assert_eq!(payload["title"], "Example Domain");
        assert_eq!(payload["url"], "https://example.com/");
    }
}
