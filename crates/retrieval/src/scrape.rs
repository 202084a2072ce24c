//! Deep scraping: replace web-search snippets with the full text of the page.
//!
//! [`PageScraper`] fetches one URL and extracts readable text; the
//! [`DeepScrapeBackend`] decorator runs a normal web search and then scrapes
//! the top hits with bounded concurrency. A page that can't be fetched, or
//! isn't fetched before the scrape deadline, keeps its search snippet. Scraped
//! text is condensed to a per-page cap so several pages share the context.

use async_trait::async_trait;
use futures::StreamExt;
use ragloom_core::error::RetrievalError;
use ragloom_core::retrieval::{EvidenceItem, RetrievalBackend, Target};
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Elements whose subtrees never contain article text.
const STRIPPED_ELEMENTS: &[&str] = &[
    "nav", "footer", "header", "aside", "script", "style", "noscript", "iframe", "svg", "button",
    "form",
];

/// Candidate main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &["article", "main", "#content", ".content", ".article", ".post"];

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "meta", "link", "wbr"];

pub const TRUNCATION_SUFFIX: &str = "... [Content truncated]";

/// Share of the retrieval deadline the scrape phase may use, in percent.
/// The rest is headroom for the outer retrieval timeout.
const SCRAPE_DEADLINE_PERCENT: u32 = 80;

pub const DEFAULT_MAX_SNIPPET_CHARS: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Not an HTML page: {0}")]
    NotHtml(String),

    #[error("No readable text")]
    Empty,
}

/// Text extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPage {
    pub url: String,
    pub title: String,
    pub text: String,
}

pub struct PageScraper {
    client: reqwest::Client,
    max_content_length: usize,
}

impl PageScraper {
    pub fn new(user_agent: &str, timeout: Duration, max_content_length: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for scraping");
                reqwest::Client::new()
            });

        Self {
            client,
            max_content_length,
        }
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapedPage, ScrapeError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(ScrapeError::NotHtml(content_type));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ScrapeError::Fetch(e.to_string()))?;

        let page = extract_page(&html, url, self.max_content_length);
        if page.text.is_empty() {
            return Err(ScrapeError::Empty);
        }
        Ok(page)
    }
}

/// Extract title and readable main-content text from an HTML document.
pub fn extract_page(html: &str, url: &str, max_content_length: usize) -> ScrapedPage {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title")
        .or_else(|| first_text(&document, "h1"))
        .unwrap_or_else(|| title_from_url(url));

    let root = CONTENT_SELECTORS
        .iter()
        .chain(std::iter::once(&"body"))
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next());

    let text = match root {
        Some(root) => {
            let mut cleaned = String::new();
            write_clean_html(root, &mut cleaned);
            html_to_text(&cleaned)
        }
        None => String::new(),
    };

    ScrapedPage {
        url: url.to_string(),
        title,
        text: truncate_content(text, max_content_length),
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn title_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .unwrap_or(url)
        .to_string()
}

/// Re-serialize `element` without attributes, skipping stripped subtrees.
fn write_clean_html(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if STRIPPED_ELEMENTS.contains(&name) {
        return;
    }

    out.push('<');
    out.push_str(name);
    out.push('>');
    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(&text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"))
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_clean_html(child, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn html_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 100);

    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_content(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}{TRUNCATION_SUFFIX}")
}

/// Shorten `text` to at most `max_chars`, preferring a sentence end in the
/// second half of the window, then a line break or space.
pub fn condense(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let window = &text[..end];

    let sentence = window
        .char_indices()
        .filter(|&(i, c)| {
            matches!(c, '.' | '!' | '?')
                && window[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .filter(|&b| b * 2 >= end);

    let cut = sentence
        .or_else(|| window.rfind(char::is_whitespace))
        .unwrap_or(end);
    window[..cut].trim_end().to_string()
}

/// Web backend decorator that swaps snippets for scraped page text.
pub struct DeepScrapeBackend {
    inner: Arc<dyn RetrievalBackend>,
    scraper: Arc<PageScraper>,
    max_urls: usize,
    max_workers: usize,
    max_snippet_chars: usize,
    /// Deadline for the whole `search` call; scraping stops short of it.
    deadline: Option<Duration>,
}

impl DeepScrapeBackend {
    pub fn new(
        inner: Arc<dyn RetrievalBackend>,
        scraper: PageScraper,
        max_urls: usize,
        max_workers: usize,
    ) -> Self {
        Self {
            inner,
            scraper: Arc::new(scraper),
            max_urls,
            max_workers: max_workers.max(1),
            max_snippet_chars: DEFAULT_MAX_SNIPPET_CHARS,
            deadline: None,
        }
    }

    pub fn with_max_snippet_chars(mut self, max_snippet_chars: usize) -> Self {
        self.max_snippet_chars = max_snippet_chars.max(1);
        self
    }

    /// Bound the whole search to `deadline`. Pages still loading when the
    /// scrape share of it runs out keep their snippets.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// `deadline` is the retrieval timeout the fan-out applies to each search.
    pub fn from_config(
        inner: Arc<dyn RetrievalBackend>,
        retrieval: &ragloom_config::RetrievalConfig,
        config: &ragloom_config::ScraperConfig,
        deadline: Duration,
    ) -> Self {
        let scraper = PageScraper::new(
            &retrieval.user_agent,
            Duration::from_secs(config.timeout_secs),
            config.max_content_length,
        );
        Self::new(inner, scraper, config.max_urls, config.max_workers)
            .with_max_snippet_chars(config.max_snippet_chars)
            .with_deadline(deadline)
    }

    fn scrape_budget(&self, started: Instant) -> Option<Duration> {
        self.deadline.map(|d| {
            (d * SCRAPE_DEADLINE_PERCENT / 100).saturating_sub(started.elapsed())
        })
    }
}

#[async_trait]
impl RetrievalBackend for DeepScrapeBackend {
    fn name(&self) -> &str {
        "deep_scrape"
    }

    async fn search(
        &self,
        query: &str,
        target: &Target,
        top_k: usize,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let started = Instant::now();
        let mut items = self.inner.search(query, target, top_k).await?;
        if !target.is_web() || items.is_empty() {
            return Ok(items);
        }

        let take = self.max_urls.min(items.len());
        let urls: Vec<(usize, String)> = items
            .iter()
            .take(take)
            .enumerate()
            .map(|(i, item)| (i, item.id.clone()))
            .collect();

        let scraper = Arc::clone(&self.scraper);
        let pages = futures::stream::iter(urls)
            .map(move |(i, url)| {
                let scraper = Arc::clone(&scraper);
                async move { (i, scraper.scrape(&url).await) }
            })
            .buffer_unordered(self.max_workers);

        let scraped: Vec<(usize, Result<ScrapedPage, ScrapeError>)> =
            match self.scrape_budget(started) {
                Some(budget) => pages.take_until(tokio::time::sleep(budget)).collect().await,
                None => pages.collect().await,
            };
        if scraped.len() < take {
            warn!(
                query = %query,
                finished = scraped.len(),
                attempted = take,
                "Deep scrape deadline reached, keeping snippets for unfinished pages"
            );
        }

        let mut replaced = 0;
        for (i, result) in scraped {
            match result {
                Ok(page) => {
                    let item = &mut items[i];
                    if item.title.trim().is_empty() {
                        item.title = page.title;
                    }
                    item.content = condense(&page.text, self.max_snippet_chars);
                    replaced += 1;
                }
                Err(e) => debug!(url = %items[i].id, error = %e, "Deep scrape: keeping snippet"),
            }
        }

        info!(query = %query, scraped = replaced, attempted = take, "Deep scrape complete");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FanOut;
    use ragloom_core::query::{Query, QueryOptions};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PAGE: &str = r#"<!doctype html>
<html>
  <head><title>Refund Policy | Acme</title><style>body { color: red; }</style></head>
  <body>
    <header><a href="/">Acme home</a></header>
    <nav><ul><li>Products</li><li>Support</li></ul></nav>
    <article>
      <h1>Refund policy</h1>
      <p>Refunds are issued within <b>30 days</b> of purchase.</p>
      <script>trackVisitor();</script>
      <form><button>Subscribe</button></form>
      <p>Opened items &amp; bundles are excluded.</p>
    </article>
    <footer>Copyright Acme</footer>
  </body>
</html>"#;

    #[test]
    fn extracts_article_text_without_chrome() {
        let page = extract_page(PAGE, "https://acme.test/refunds", 10_000);
        assert_eq!(page.title, "Refund Policy | Acme");
        assert!(page.text.contains("30 days"));
        assert!(page.text.contains("Opened items & bundles are excluded."));
        assert!(!page.text.contains("trackVisitor"));
        assert!(!page.text.contains("Subscribe"));
        assert!(!page.text.contains("Products"));
        assert!(!page.text.contains("Copyright"));
    }

    #[test]
    fn falls_back_to_body_and_h1_title() {
        let html = "<html><body><h1>Warranty</h1><div>Two year limited warranty.</div></body></html>";
        let page = extract_page(html, "https://acme.test/w", 10_000);
        assert_eq!(page.title, "Warranty");
        assert!(page.text.contains("Two year limited warranty."));
    }

    #[test]
    fn title_falls_back_to_url_segment() {
        let page = extract_page("<html><body><p>text</p></body></html>", "https://acme.test/docs/shipping/", 100);
        assert_eq!(page.title, "shipping");
    }

    #[test]
    fn long_content_is_truncated_with_suffix() {
        let body = "word ".repeat(100);
        let html = format!("<html><body><main><p>{body}</p></main></body></html>");
        let page = extract_page(&html, "https://acme.test/long", 50);
        assert!(page.text.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(page.text.chars().count(), 50 + TRUNCATION_SUFFIX.chars().count());
    }

    struct FixedWeb(Vec<EvidenceItem>);

    #[async_trait]
    impl RetrievalBackend for FixedWeb {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn search(&self, _q: &str, _t: &Target, _k: usize) -> Result<Vec<EvidenceItem>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn unreachable_pages_keep_snippets() {
        let inner = Arc::new(FixedWeb(vec![
            EvidenceItem::web("http://127.0.0.1:9/a", "A", "snippet a", 0.9),
            EvidenceItem::web("http://127.0.0.1:9/b", "B", "snippet b", 0.8),
        ]));
        let deep = DeepScrapeBackend::new(
            inner,
            PageScraper::new("test", Duration::from_millis(200), 1000),
            5,
            2,
        );

        let items = deep.search("q", &Target::Web, 5).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "snippet a");
        assert_eq!(items[1].content, "snippet b");
    }

    #[test]
    fn condense_keeps_short_text() {
        assert_eq!(condense("Short page.", 100), "Short page.");
    }

    #[test]
    fn condense_cuts_at_sentence_end() {
        let text = "First sentence here. Second sentence runs past the cap.";
        assert_eq!(condense(text, 30), "First sentence here.");
    }

    #[test]
    fn condense_falls_back_to_word_boundary() {
        assert_eq!(condense("alpha beta gamma delta", 12), "alpha beta");
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (format!("http://{addr}"), handle)
    }

    /// Answers every request with `body` as HTML.
    async fn html_server(body: String) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        (format!("http://{addr}"), handle)
    }

    fn pages(base: &str, n: usize) -> Vec<EvidenceItem> {
        (0..n)
            .map(|i| {
                EvidenceItem::web(
                    format!("{base}/p{i}"),
                    format!("P{i}"),
                    format!("snippet {i}"),
                    0.9 - i as f32 * 0.1,
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn slow_pages_keep_snippets_within_retrieval_timeout() {
        let (base, server) = silent_server().await;
        let retrieval_timeout = Duration::from_secs(1);
        let deep = DeepScrapeBackend::new(
            Arc::new(FixedWeb(pages(&base, 5))),
            PageScraper::new("test", Duration::from_secs(10), 1000),
            5,
            3,
        )
        .with_deadline(retrieval_timeout);

        let fan = FanOut::new(Arc::new(deep), retrieval_timeout);
        let query = Query::new("kettle", Target::Web, QueryOptions::default()).unwrap();
        let report = fan.run(&[query.sub_query(0, "kettle")], &Target::Web, 5).await;

        assert!(!report.all_failed());
        let evidence = report.evidence();
        assert_eq!(evidence.len(), 5);
        assert_eq!(evidence[0].content, "snippet 0");
        assert_eq!(evidence[4].content, "snippet 4");
        server.abort();
    }

    #[tokio::test]
    async fn scraped_text_is_condensed_per_page() {
        let sentences = "Boiling takes three minutes. ".repeat(500);
        let (base, server) =
            html_server(format!("<html><body><article><p>{sentences}</p></article></body></html>")).await;
        let deep = DeepScrapeBackend::new(
            Arc::new(FixedWeb(pages(&base, 2))),
            PageScraper::new("test", Duration::from_secs(5), 100_000),
            5,
            2,
        )
        .with_max_snippet_chars(200);

        let items = deep.search("kettle", &Target::Web, 5).await.unwrap();
        for item in &items {
            assert!(item.content.starts_with("Boiling takes three minutes."));
            assert!(item.content.chars().count() <= 200);
            assert!(item.content.ends_with('.'));
        }
        server.abort();
    }
}
