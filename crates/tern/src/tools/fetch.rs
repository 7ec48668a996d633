use anyhow::Result;
use reqwest::Client;
use scraper::{ElementRef, Html};
use std::time::Duration;
use tracing::debug;

use super::BROWSER_USER_AGENT;

pub const DEFAULT_MAX_CHARS: usize = 2000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch a page and render a length-capped plain-text extraction as tool
/// output. Errors never escape: they are converted to descriptive text.
pub(crate) async fn run(client: &Client, url: &str, max_chars: usize) -> String {
    match fetch(client, url).await {
        Ok(html) => truncate(&extract_text(&html), max_chars),
        Err(e) => {
            debug!("fetch of {:?} failed: {}", url, e);
            format!("Unable to retrieve webpage content: {}", e)
        }
    }
}

async fn fetch(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .header("User-Agent", BROWSER_USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    Ok(response.text().await?)
}

/// Body text with script/style subtrees removed, collapsed to non-blank
/// trimmed lines joined by newlines.
fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();
    collect_text(document.root_element(), &mut text);

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    if matches!(element.value().name(), "script" | "style") {
        return;
    }

    for node in element.children() {
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(node) {
            collect_text(child, out);
        }
    }
}

/// Cap to `max_chars` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut truncated: String = text.chars().take(max_chars).collect();
        truncated.push_str("...");
        truncated
    } else {
        text.to_string()
    }
}
