//! Fetching result pages and reducing them to text.

use crate::error::{Result, SpecGenieError};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use std::time::Duration;

/// Elements whose text is never page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Status and body of a fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// HTTP GET with a timeout.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Fetcher backed by reqwest.
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpecGenieError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(FetchedPage { status, body })
    }
}

/// Plain text of an HTML document, with runs of blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    for node in document.tree.nodes() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let skipped = node
            .parent()
            .and_then(|p| p.value().as_element())
            .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()));
        if !skipped {
            text.push_str(fragment);
        }
    }

    collapse_blank_lines(&text)
}

/// Trim trailing whitespace per line and keep at most one blank line in a row.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = true;

    for line in text.lines().map(str::trim_end) {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        out.push(if blank { "" } else { line });
        previous_blank = blank;
    }

    while out.last() == Some(&"") {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_blank_lines() {
        let text = "\n\nVoltage: 5V\n\n\n\n   \nCurrent: 2A  \n\n";
        assert_eq!(collapse_blank_lines(text), "Voltage: 5V\n\nCurrent: 2A");
    }

    #[test]
    fn test_html_to_text_drops_markup_and_scripts() {
        let html = r#"<html><head><title>Acme 42</title><style>p { color: red }</style>
<script>var tracking = 1;</script></head>
<body><h1>Acme 42</h1>


<p>Output voltage: <b>5V</b></p></body></html>"#;

        let text = html_to_text(html);

        assert!(text.contains("Output voltage: 5V"));
        assert!(text.contains("Acme 42"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("<p>"));
        assert!(!text.contains("\n\n\n"));
    }
}
