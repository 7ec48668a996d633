use anyhow::Result;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::BROWSER_USER_AGENT;

/// Keyless HTML search endpoint
pub const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

pub const NO_RESULTS: &str = "No relevant search results found";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A single ranked result. Ephemeral: rendered into the tool's text output
/// and never retained as structured data.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// Run a search and render the outcome as tool output. Errors never escape:
/// they are converted to descriptive text the model can reason about.
pub(crate) async fn run(client: &Client, endpoint: &str, query: &str, num_results: usize) -> String {
    match search(client, endpoint, query).await {
        Ok(html) => {
            let results = parse_results(&html, num_results);
            if results.is_empty() {
                NO_RESULTS.to_string()
            } else {
                format_results(&results)
            }
        }
        Err(e) => {
            debug!("search for {:?} failed: {}", query, e);
            format!("Error during search: {}", e)
        }
    }
}

async fn search(client: &Client, endpoint: &str, query: &str) -> Result<String> {
    let response = client
        .get(endpoint)
        .query(&[("q", query)])
        .header("User-Agent", BROWSER_USER_AGENT)
        .timeout(SEARCH_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    Ok(response.text().await?)
}

/// Pull `{title, snippet, link}` triples out of the result page, keeping
/// document order and stopping at `limit`.
fn parse_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let document = Html::parse_document(html);
    let result_selector = Selector::parse("div.result").unwrap();
    let title_selector = Selector::parse("a.result__a").unwrap();
    let snippet_selector = Selector::parse(".result__snippet").unwrap();

    let mut results = Vec::new();
    for element in document.select(&result_selector) {
        if results.len() >= limit {
            break;
        }

        let title_link = match element.select(&title_selector).next() {
            Some(link) => link,
            None => continue,
        };

        let title = collapse_whitespace(&title_link.text().collect::<String>());
        let url = resolve_redirect(title_link.value().attr("href").unwrap_or_default());
        if title.is_empty() || url.is_empty() {
            continue;
        }

        let snippet = element
            .select(&snippet_selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .unwrap_or_default();

        results.push(SearchResult {
            title,
            snippet,
            url,
        });
    }

    results
}

/// Render results as the numbered list fed back to the model.
pub(crate) fn format_results(results: &[SearchResult]) -> String {
    let formatted: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, result)| {
            format!(
                "{}. **{}**\n   Summary: {}\n   Link: {}\n",
                i + 1,
                result.title,
                result.snippet,
                result.url
            )
        })
        .collect();

    formatted.join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Result links come back as `//duckduckgo.com/l/?uddg=<target>` wrappers;
/// unwrap them to the destination URL.
fn resolve_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };

    if let Ok(url) = Url::parse(&absolute) {
        if url.domain() == Some("duckduckgo.com") && url.path().starts_with("/l/") {
            if let Some((_, target)) = url.query_pairs().find(|(key, _)| key == "uddg") {
                return target.into_owned();
            }
        }
    }

    absolute
}
