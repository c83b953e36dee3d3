//! Bounded, polite, in-domain crawler.
//!
//! Breadth-first frontier over same-origin links, a 500ms delay between
//! fetches, and a 10s deadline per page.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const POLITENESS_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub src: String,
    pub alt: String,
    pub has_alt: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRef {
    pub url: String,
    pub text: String,
    pub internal: bool,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub images: Vec<ImageRef>,
    pub links: Vec<LinkRef>,
    pub word_count: i64,
    pub load_time_ms: i64,
    pub status_code: u16,
}

/// One crawl per instance; not shared across tasks.
pub struct Crawler {
    client: reqwest::Client,
}

impl Crawler {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("AutoSEO Bot/1.0")
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Breadth-first crawl starting at `start_url`, bounded by `max_pages`.
    pub async fn crawl(&self, start_url: &str, max_pages: i64) -> Vec<Page> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        pending.push_back(start_url.to_string());

        let start_host = match Url::parse(start_url) {
            Ok(u) => u.host_str().map(|h| h.to_string()),
            Err(_) => None,
        };

        let mut results = Vec::new();

        while let Some(url) = pending.pop_front() {
            if (results.len() as i64) >= max_pages {
                break;
            }
            if visited.contains(&url) {
                continue;
            }
            visited.insert(url.clone());

            match self.fetch_page(&url, start_host.as_deref()).await {
                Ok(Some(page)) => {
                    for link in &page.links {
                        if link.internal && !visited.contains(&link.url) {
                            pending.push_back(link.url.clone());
                        }
                    }
                    results.push(page);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(url = %url, error = %err, "crawl fetch failed, skipping");
                }
            }

            tokio::time::sleep(POLITENESS_DELAY).await;
        }

        results
    }

    async fn fetch_page(&self, url: &str, start_host: Option<&str>) -> anyhow::Result<Option<Page>> {
        let started = std::time::Instant::now();
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Ok(None);
        }
        let body = response.text().await?;
        let load_time_ms = started.elapsed().as_millis() as i64;

        let document = Html::parse_document(&body);
        let title = extract_title(&document);
        let meta_description = extract_meta_description(&document);
        let h1 = extract_headings(&document, "h1");
        let h2 = extract_headings(&document, "h2");
        let images = extract_images(&document, url);
        let links = extract_links(&document, url, start_host);
        let word_count = document.root_element().text().collect::<String>().split_whitespace().count() as i64;

        Ok(Some(Page {
            url: url.to_string(),
            title,
            meta_description,
            h1,
            h2,
            images,
            links,
            word_count,
            load_time_ms,
            status_code: status.as_u16(),
        }))
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document.select(&selector).next().map(|el| {
        el.text().collect::<String>().trim().to_string()
    }).filter(|t| !t.is_empty())
}

fn extract_meta_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("meta[name='description']").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn extract_headings(document: &Html, tag: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(tag) else { return Vec::new() };
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .collect()
}

fn extract_images(document: &Html, base_url: &str) -> Vec<ImageRef> {
    let Ok(selector) = Selector::parse("img") else { return Vec::new() };
    let Ok(base) = Url::parse(base_url) else { return Vec::new() };

    document
        .select(&selector)
        .filter_map(|el| {
            let src = el.value().attr("src")?;
            let resolved = base.join(src).ok()?.to_string();
            let alt = el.value().attr("alt").unwrap_or("").to_string();
            Some(ImageRef {
                has_alt: !alt.is_empty(),
                src: resolved,
                alt,
            })
        })
        .collect()
}

fn extract_links(document: &Html, base_url: &str, start_host: Option<&str>) -> Vec<LinkRef> {
    let Ok(selector) = Selector::parse("a[href]") else { return Vec::new() };
    let Ok(base) = Url::parse(base_url) else { return Vec::new() };

    document
        .select(&selector)
        .filter_map(|el| {
            let href = el.value().attr("href")?.trim();
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                return None;
            }
            let resolved = base.join(href).ok()?;
            let internal = resolved.host_str() == start_host;
            let text: String = el.text().collect::<String>().trim().chars().take(100).collect();
            Some(LinkRef {
                url: resolved.to_string(),
                text,
                internal,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_extraction_trims_and_collects_text() {
        let html = "<html><body><h1> Title One </h1><h1>Title Two</h1></body></html>";
        let document = Html::parse_document(html);
        assert_eq!(extract_headings(&document, "h1"), vec!["Title One", "Title Two"]);
    }

    #[test]
    fn meta_description_missing_returns_none() {
        let document = Html::parse_document("<html><head></head><body></body></html>");
        assert_eq!(extract_meta_description(&document), None);
    }

    #[test]
    fn links_classify_internal_vs_external_and_skip_fragments() {
        let html = r#"<html><body>
            <a href="/about">About</a>
            <a href="https://other.test/x">Other</a>
            <a href="#top">Top</a>
            <a href="mailto:a@x.test">Mail</a>
        </body></html>"#;
        let document = Html::parse_document(html);
        let links = extract_links(&document, "https://site.test/", Some("site.test"));
        assert_eq!(links.len(), 2);
        assert!(links[0].internal);
        assert!(!links[1].internal);
    }

    #[test]
    fn images_report_has_alt_flag() {
        let html = r#"<html><body><img src="/a.png" alt="A"><img src="/b.png"></body></html>"#;
        let document = Html::parse_document(html);
        let images = extract_images(&document, "https://site.test/");
        assert_eq!(images.len(), 2);
        assert!(images[0].has_alt);
        assert!(!images[1].has_alt);
    }

    #[tokio::test]
    async fn crawl_follows_internal_links_and_stops_at_max_pages() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let home = format!(
            r#"<html><head><title>Home</title></head><body><a href="/about">About</a></body></html>"#
        );
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(home))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><head><title>About</title></head><body>hi</body></html>"))
            .mount(&server)
            .await;

        let crawler = Crawler::new().unwrap();
        let pages = crawler.crawl(&server.uri(), 10).await;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].title.as_deref(), Some("Home"));
        assert_eq!(pages[1].title.as_deref(), Some("About"));
    }

    #[tokio::test]
    async fn crawl_skips_non_200_responses() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let crawler = Crawler::new().unwrap();
        let pages = crawler.crawl(&server.uri(), 5).await;
        assert!(pages.is_empty());
    }
}
