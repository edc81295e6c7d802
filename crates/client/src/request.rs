//! Logical fetch requests and their cache keys.
//!
//! Targets are normalized when constructed, so two requests that mean the same
//! thing carry identical targets and therefore derive the same [`CacheKey`].

use std::fmt;

use harvest_core::Error;
use harvest_core::cache::{CacheKey, RecordKind, compute_cache_key};
use url::Url;

use crate::canonical::{UrlError, canonicalize};

/// Parameters of a listing search.
///
/// Keywords and location are trimmed, whitespace-collapsed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchQuery {
    keywords: String,
    location: String,
    page: u32,
}

impl SearchQuery {
    pub fn new(keywords: &str, location: &str, page: u32) -> Result<Self, Error> {
        let keywords = normalize_terms(keywords);
        if keywords.is_empty() {
            return Err(Error::InvalidInput("search keywords must not be empty".into()));
        }
        Ok(Self { keywords, location: normalize_terms(location), page })
    }

    pub fn keywords(&self) -> &str {
        &self.keywords
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn page(&self) -> u32 {
        self.page
    }
}

fn normalize_terms(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A single page, already canonicalized.
    Url(Url),
    /// One page of search results.
    Search(SearchQuery),
}

impl Target {
    /// Canonicalize `input` into a URL target.
    pub fn url(input: &str) -> Result<Self, UrlError> {
        canonicalize(input).map(Target::Url)
    }

    fn discriminator(&self) -> &'static str {
        match self {
            Target::Url(_) => "url",
            Target::Search(_) => "search",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Url(url) => write!(f, "{url}"),
            Target::Search(q) => write!(f, "search '{}' in '{}' (page {})", q.keywords, q.location, q.page),
        }
    }
}

/// A logical request: the target plus the kind of record it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub target: Target,
    pub kind: RecordKind,
}

impl FetchRequest {
    pub fn new(target: Target, kind: RecordKind) -> Self {
        Self { target, kind }
    }

    /// Request for a single page of the given kind.
    pub fn page(kind: RecordKind, url: &str) -> Result<Self, Error> {
        Ok(Self::new(Target::url(url)?, kind))
    }

    pub fn job(url: &str) -> Result<Self, Error> {
        Self::page(RecordKind::Job, url)
    }

    pub fn profile(url: &str) -> Result<Self, Error> {
        Self::page(RecordKind::Profile, url)
    }

    /// Job search results page; an empty location means "anywhere".
    pub fn job_search(keywords: &str, location: &str, page: u32) -> Result<Self, Error> {
        Ok(Self::new(Target::Search(SearchQuery::new(keywords, location, page)?), RecordKind::Job))
    }

    /// Key identifying this request in the cache.
    pub fn cache_key(&self) -> CacheKey {
        let kind = self.kind.as_str();
        let discriminator = self.target.discriminator();
        match &self.target {
            Target::Url(url) => compute_cache_key(&[kind, discriminator, url.as_str()]),
            Target::Search(q) => {
                let page = q.page.to_string();
                compute_cache_key(&[kind, discriminator, q.keywords.as_str(), q.location.as_str(), page.as_str()])
            }
        }
    }
}

/// Where search targets are resolved to URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchEndpoint {
    pub base: Url,
    pub keywords_param: String,
    pub location_param: String,
    pub offset_param: String,
    /// Results per page; the offset is `page * page_size`.
    pub page_size: u32,
}

impl SearchEndpoint {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            keywords_param: "keywords".into(),
            location_param: "location".into(),
            offset_param: "start".into(),
            page_size: 25,
        }
    }

    pub fn url_for(&self, query: &SearchQuery) -> Url {
        let mut url = self.base.clone();
        let offset = query.page.saturating_mul(self.page_size);
        url.query_pairs_mut()
            .append_pair(&self.keywords_param, &query.keywords)
            .append_pair(&self.location_param, &query.location)
            .append_pair(&self.offset_param, &offset.to_string());
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_urls_share_key() {
        let a = FetchRequest::job("https://Example.com/jobs/view/123#apply").unwrap();
        let b = FetchRequest::job("  example.com/jobs/view/123 ").unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().as_str().len(), 64);
    }

    #[test]
    fn test_kind_is_part_of_key() {
        let job = FetchRequest::job("https://example.com/x").unwrap();
        let profile = FetchRequest::profile("https://example.com/x").unwrap();
        assert_ne!(job.cache_key(), profile.cache_key());
    }

    #[test]
    fn test_query_is_part_of_key() {
        let a = FetchRequest::job("https://example.com/jobs?id=1").unwrap();
        let b = FetchRequest::job("https://example.com/jobs?id=2").unwrap();
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_search_normalization() {
        let a = FetchRequest::job_search("  Rust   Engineer ", "Berlin", 0).unwrap();
        let b = FetchRequest::job_search("rust engineer", " berlin", 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cache_key(), b.cache_key());

        let next_page = FetchRequest::job_search("rust engineer", "berlin", 1).unwrap();
        assert_ne!(a.cache_key(), next_page.cache_key());
    }

    #[test]
    fn test_search_requires_keywords() {
        let err = FetchRequest::job_search("   ", "Berlin", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = FetchRequest::job("ftp://example.com/file").unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }

    #[test]
    fn test_search_endpoint_url() {
        let endpoint = SearchEndpoint::new(Url::parse("https://example.com/jobs/search/").unwrap());
        let query = SearchQuery::new("Rust Engineer", "New York", 2).unwrap();
        assert_eq!(
            endpoint.url_for(&query).as_str(),
            "https://example.com/jobs/search/?keywords=rust+engineer&location=new+york&start=50"
        );
    }
}
