//! Remote endpoints: catalog page, primary reader page, and fallback JSON API.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, trace};
use url::Url;

use novelpull_shared::{FetchConfig, FetchError, NovelPullError, Result, WorkId};

/// Accept header sent with every request.
const ACCEPT_VALUE: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.8,*/*;q=0.7";

/// Accept-Language header sent with every request.
const ACCEPT_LANGUAGE_VALUE: &str = "zh-CN,zh;q=0.9,en;q=0.6";

/// Outcome of a single request against one endpoint.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Session-specific request headers, issued by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    pub cookie: String,
    pub user_agent: String,
}

/// The three remote endpoints the engine talks to.
///
/// Implementations classify every failure with an
/// [`ErrorKind`](novelpull_shared::ErrorKind) at the point it happens; callers
/// never inspect status codes.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Raw HTML of the work's catalog page.
    async fn catalog_page(&self, work: WorkId, headers: &RequestHeaders) -> FetchResult<String>;

    /// Obfuscated chapter text from the reader page.
    async fn primary_chapter(&self, chapter_id: &str, headers: &RequestHeaders) -> FetchResult<String>;

    /// Obfuscated chapter text from the JSON API.
    async fn fallback_chapter(&self, chapter_id: &str, headers: &RequestHeaders) -> FetchResult<String>;
}

// ---------------------------------------------------------------------------
// HttpSource
// ---------------------------------------------------------------------------

/// [`ContentSource`] over HTTP.
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut defaults = HeaderMap::new();
        defaults.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        defaults.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE));

        let base_url = config.base_url.trim_end_matches('/').to_string();
        if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/")) {
            defaults.insert(REFERER, referer);
        }

        let client = Client::builder()
            .default_headers(defaults)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NovelPullError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    async fn get(&self, url: &str, headers: &RequestHeaders) -> FetchResult<String> {
        trace!(%url, "GET");
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &headers.user_agent)
            .header(COOKIE, &headers.cookie)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() { "timed out" } else { "request failed" };
                FetchError::transport(format!("{url}: {what}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::transport(format!("{url}: failed to read body: {e}")))
    }
}

fn classify_status(url: &str, status: StatusCode) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            FetchError::session_invalid(format!("{url}: HTTP {status}"))
        }
        _ => FetchError::transport(format!("{url}: HTTP {status}")),
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    async fn catalog_page(&self, work: WorkId, headers: &RequestHeaders) -> FetchResult<String> {
        self.get(&format!("{}/page/{work}", self.base_url), headers).await
    }

    async fn primary_chapter(&self, chapter_id: &str, headers: &RequestHeaders) -> FetchResult<String> {
        let url = format!("{}/reader/{chapter_id}", self.base_url);
        let html = self.get(&url, headers).await?;
        extract_reader_text(&html).ok_or_else(|| {
            FetchError::transport(format!("{url}: reader content container not found"))
        })
    }

    async fn fallback_chapter(&self, chapter_id: &str, headers: &RequestHeaders) -> FetchResult<String> {
        let url = Url::parse_with_params(
            &format!("{}/api/reader/full", self.base_url),
            &[("itemId", chapter_id)],
        )
        .map_err(|e| FetchError::transport(format!("invalid fallback URL: {e}")))?;
        let body = self.get(url.as_str(), headers).await?;
        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::transport(format!("{url}: invalid JSON: {e}")))?;

        let content = json
            .pointer("/data/chapterData/content")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                FetchError::transport(format!("{url}: data.chapterData.content missing"))
            })?;
        debug!(chapter_id, chars = content.chars().count(), "fallback endpoint answered");
        Ok(paragraphs_from_markup(content))
    }
}

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Paragraph text of the reader page, one paragraph per line.
///
/// `None` when the reader container is absent (an error page, not an empty chapter).
pub fn extract_reader_text(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let container = Selector::parse("div.muye-reader-content").ok()?;
    let paragraph = Selector::parse("p").ok()?;

    let reader = doc.select(&container).next()?;
    let lines: Vec<String> = reader
        .select(&paragraph)
        .map(|p| p.text().collect::<String>())
        .collect();
    Some(lines.join("\n"))
}

/// API content is either plain text or `<p>`-wrapped paragraphs.
fn paragraphs_from_markup(content: &str) -> String {
    if !content.contains("<p") {
        return content.to_string();
    }
    let fragment = Html::parse_fragment(content);
    let Ok(paragraph) = Selector::parse("p") else {
        return content.to_string();
    };
    let lines: Vec<String> = fragment
        .select(&paragraph)
        .map(|p| p.text().collect::<String>())
        .collect();
    if lines.is_empty() {
        content.to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use novelpull_shared::ErrorKind;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers() -> RequestHeaders {
        RequestHeaders {
            cookie: "novel_web_id=123".into(),
            user_agent: "test-agent".into(),
        }
    }

    fn source(server: &MockServer) -> HttpSource {
        let config = FetchConfig {
            base_url: server.uri(),
            request_timeout: Duration::from_secs(2),
            retry_count: 1,
            backoff: vec![Duration::ZERO],
            worker_count: 1,
            min_content_chars: 1,
            snapshot_every: 0,
            pacing: novelpull_shared::PacingConfig {
                delay_ms: [0, 0],
                dwell_ms: [0, 0],
            },
        };
        HttpSource::new(&config).unwrap()
    }

    #[test]
    fn reader_text_joins_paragraphs() {
        let html = r#"<html><body>
            <div class="muye-reader-content noselect"><div><p>第一段</p><p>第二段</p></div></div>
        </body></html>"#;
        assert_eq!(extract_reader_text(html).unwrap(), "第一段\n第二段");
        assert!(extract_reader_text("<html><body>oops</body></html>").is_none());
    }

    #[test]
    fn api_markup_is_split_into_paragraphs() {
        assert_eq!(paragraphs_from_markup("<p>甲</p><p>乙</p>"), "甲\n乙");
        assert_eq!(paragraphs_from_markup("纯文本"), "纯文本");
    }

    #[tokio::test]
    async fn primary_sends_session_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reader/42"))
            .and(header("cookie", "novel_web_id=123"))
            .and(header("user-agent", "test-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<div class="muye-reader-content noselect"><p>正文内容</p></div>"#,
            ))
            .mount(&server)
            .await;

        let text = source(&server).primary_chapter("42", &headers()).await.unwrap();
        assert_eq!(text, "正文内容");
    }

    #[tokio::test]
    async fn fallback_reads_json_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/reader/full"))
            .and(query_param("itemId", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "chapterData": { "content": "<p>一</p><p>二</p>" } }
            })))
            .mount(&server)
            .await;

        let text = source(&server).fallback_chapter("42", &headers()).await.unwrap();
        assert_eq!(text, "一\n二");
    }

    #[tokio::test]
    async fn status_codes_are_classified() {
        let server = MockServer::start().await;
        Mock::given(path("/reader/1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(path("/reader/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let src = source(&server);
        let forbidden = src.primary_chapter("1", &headers()).await.unwrap_err();
        assert_eq!(forbidden.kind, ErrorKind::SessionInvalid);
        let server_error = src.primary_chapter("2", &headers()).await.unwrap_err();
        assert_eq!(server_error.kind, ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn missing_reader_container_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(path("/reader/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha</html>"))
            .mount(&server)
            .await;

        let err = source(&server).primary_chapter("9", &headers()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
        assert!(err.message.contains("container"));
    }
}
