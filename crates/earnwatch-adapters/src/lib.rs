//! Earnings page sources: fetch a stock's earnings calendar page and pull out
//! the company label and the raw earnings date cells.

use std::borrow::Cow;

use async_trait::async_trait;
use earnwatch_storage::{HttpError, HttpFetcher};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "earnwatch-adapters";

pub const YAHOO_EARNINGS_URL: &str = "https://finance.yahoo.com/calendar/earnings";

const COMPANY_SELECTOR: &str = "td[aria-label='Company']";
const EARNINGS_DATE_SELECTOR: &str = "td[aria-label='Earnings Date']";

/// What one fetch yields before any date parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// Trimmed company label; empty when the page has none.
    pub company_name: String,
    /// Trimmed text of every earnings date cell, in document order.
    pub date_tokens: Vec<String>,
}

impl ScrapedPage {
    pub fn has_label(&self) -> bool {
        !self.company_name.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("could not read document: {0}")]
    Document(String),
}

#[async_trait]
pub trait EarningsPageSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch(&self, ticker: &str) -> Result<ScrapedPage, FetchError>;
}

pub struct YahooEarningsSource {
    http: HttpFetcher,
    base_url: String,
}

impl YahooEarningsSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            base_url: YAHOO_EARNINGS_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn url_for(&self, ticker: &str) -> String {
        format!("{}?symbol={}", self.base_url, ticker.trim())
    }
}

#[async_trait]
impl EarningsPageSource for YahooEarningsSource {
    fn source_id(&self) -> &'static str {
        "yahoo-earnings-calendar"
    }

    async fn fetch(&self, ticker: &str) -> Result<ScrapedPage, FetchError> {
        let url = self.url_for(ticker);
        let response = self.http.fetch_html(&url).await?;
        let body = decode_body(&response.body);
        let page = parse_earnings_page(&body)?;
        debug!(
            ticker,
            company = %page.company_name,
            tokens = page.date_tokens.len(),
            "parsed earnings page"
        );
        Ok(page)
    }
}

/// Parses an earnings calendar document. Never fails on missing cells: an
/// absent label comes back empty and absent dates come back as no tokens.
pub fn parse_earnings_page(html: &str) -> Result<ScrapedPage, FetchError> {
    let document = Html::parse_document(html);
    let company_name = select_first_text(&document, COMPANY_SELECTOR)?.unwrap_or_default();
    let date_tokens = select_all_texts(&document, EARNINGS_DATE_SELECTOR)?;
    Ok(ScrapedPage {
        company_name,
        date_tokens,
    })
}

/// Bytes that are not valid UTF-8 become U+FFFD instead of failing the page.
fn decode_body(body: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(body)
}

fn selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector).map_err(|e| FetchError::Document(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, FetchError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

/// Keeps empty cells so callers see how many date cells the page had.
fn select_all_texts(document: &Html, css: &str) -> Result<Vec<String>, FetchError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .map(|n| n.text().collect::<String>().trim().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use earnwatch_storage::HttpClientConfig;

    #[test]
    fn extracts_label_and_every_date_cell() {
        let html = r#"
            <table><tbody>
              <tr><td aria-label="Company"> Microsoft Corporation </td>
                  <td aria-label="Earnings Date"><span>Jan 30, 2024, 4 PMEST</span></td></tr>
              <tr><td aria-label="Company">Microsoft Corporation</td>
                  <td aria-label="Earnings Date">   </td></tr>
            </tbody></table>
        "#;
        let page = parse_earnings_page(html).expect("parse");
        assert_eq!(page.company_name, "Microsoft Corporation");
        assert_eq!(page.date_tokens, vec!["Jan 30, 2024, 4 PMEST", ""]);
        assert!(page.has_label());
    }

    #[test]
    fn missing_cells_yield_empty_page() {
        let page = parse_earnings_page("<html><body><p>No results</p></body></html>")
            .expect("parse");
        assert!(!page.has_label());
        assert!(page.date_tokens.is_empty());
    }

    #[test]
    fn whitespace_label_is_unresolved() {
        let page = parse_earnings_page(
            r#"<table><tr><td aria-label="Company">   </td></tr></table>"#,
        )
        .expect("parse");
        assert!(!page.has_label());
    }

    #[test]
    fn stray_invalid_bytes_do_not_reject_the_page() {
        let mut body = b"<table><tr><td aria-label=\"Company\">Acme \xff Corp</td>".to_vec();
        body.extend_from_slice(
            b"<td aria-label=\"Earnings Date\">Jul 03, 2024, 5 PMEDT</td></tr></table>",
        );
        let page = parse_earnings_page(&decode_body(&body)).expect("parse");
        assert!(page.company_name.starts_with("Acme"));
        assert_eq!(page.date_tokens, vec!["Jul 03, 2024, 5 PMEDT"]);
    }

    #[test]
    fn url_carries_the_ticker_symbol() {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let source = YahooEarningsSource::new(http).with_base_url("http://localhost:9/cal");
        assert_eq!(source.url_for(" MSFT "), "http://localhost:9/cal?symbol=MSFT");
    }
}
