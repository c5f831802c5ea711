use anyhow::Context;
use htmd::options::{BulletListMarker, HeadingStyle, Options};
use htmd::HtmlToMarkdown;
use reqwest::Client;
use scraper::Html;
use thiserror::Error;
use url::Url;

/// Subtrees that never carry page content.
const DROPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "nav", "header", "footer", "aside", "noscript", "svg", "form",
    "button", "iframe", "template",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Fetches a web page and renders its readable content as Markdown.
pub struct PageExtractor {
    client: Client,
}

impl PageExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn extract(&self, raw_url: &str) -> Result<String, ExtractionError> {
        let url = parse_url(raw_url)?;
        let html = self.fetch_html(&url).await?;
        let markdown = html_to_markdown(&html);
        tracing::info!(
            "Extracted {} chars of markdown from {} ({} bytes of HTML)",
            markdown.len(),
            url,
            html.len()
        );
        Ok(markdown)
    }

    async fn fetch_html(&self, url: &Url) -> anyhow::Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {}", status, url);
        }

        response
            .text()
            .await
            .context("Failed to read response body")
    }
}

pub fn parse_url(raw: &str) -> Result<Url, ExtractionError> {
    let invalid = |reason: String| ExtractionError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

/// Converts a page to Markdown, leaving out navigation chrome and scripts.
pub fn html_to_markdown(html: &str) -> String {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(DROPPED_ELEMENTS.to_vec())
        .options(Options {
            heading_style: HeadingStyle::Atx,
            bullet_list_marker: BulletListMarker::Dash,
            ..Default::default()
        })
        .build();

    match converter.convert(html) {
        Ok(markdown) => markdown.trim().to_string(),
        Err(e) => {
            tracing::warn!("Markdown conversion failed, falling back to plain text: {}", e);
            let document = Html::parse_document(html);
            let text: String = document.root_element().text().collect();
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        }
    }
}
