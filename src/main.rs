//! Fan-out/fan-in sample: fetch the page titles of several documentation
//! pages in parallel and join them in request order.
//!
//! Instances are stored under `./durable-fanout-data`, so an interrupted run
//! picks up where it left off on the next start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use durable_fanout::providers::fs::FsProvider;
use durable_fanout::runtime::{OrchestrationStatus, Runtime};
use durable_fanout::{ActivityContext, ActivityRegistry, OrchestrationContext, OrchestrationRegistry, durable_info};

const FETCH_TITLE: &str = "FetchTitle";
const CONCURRENT_FETCH: &str = "ConcurrentFetchOrchestration";
const SITE_NAME: &str = "microsoft learn";
const NO_TITLE: &str = "No title found";

const URLS: [&str; 4] = [
    "https://learn.microsoft.com/azure/azure-functions/durable/durable-functions-overview",
    "https://learn.microsoft.com/azure/azure-functions/durable/durable-task-scheduler/durable-task-scheduler",
    "https://learn.microsoft.com/azure/azure-functions/functions-scenarios",
    "https://learn.microsoft.com/azure/azure-functions/functions-create-ai-enabled-apps",
];

/// Page name from the first `<title>` element of the form
/// `<title ...>Name | Microsoft Learn</title>`, matched case-insensitively.
/// Titles without the site suffix do not count.
fn extract_title(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(i) = lower[from..].find("<title") {
        let open = from + i;
        from = open + 1;
        let Some(start) = lower[open..].find('>').map(|j| open + j + 1) else {
            break;
        };
        // Title text may not contain markup
        let end = lower[start..].find('<').map_or(lower.len(), |j| start + j);
        if !lower[end..].starts_with("</title>") {
            continue;
        }
        if let Some(title) = page_name(&html[start..end], &lower[start..end]) {
            return title;
        }
    }
    NO_TITLE.to_string()
}

/// `text` minus a trailing `| Microsoft Learn`; `lower` is `text` lowercased.
fn page_name(text: &str, lower: &str) -> Option<String> {
    let name = lower.strip_suffix(SITE_NAME)?.trim_end().strip_suffix('|')?;
    if name.is_empty() {
        return None;
    }
    Some(text[..name.len()].trim().to_string())
}

async fn get_page(url: &str) -> Result<String, reqwest::Error> {
    reqwest::get(url).await?.error_for_status()?.text().await
}

async fn fetch_title(ctx: ActivityContext, url: String) -> Result<String, String> {
    ctx.trace_info(format!("fetching {url}"));
    match get_page(&url).await {
        Ok(html) => Ok(extract_title(&html)),
        // The title list is still useful when one page is down
        Err(e) => {
            ctx.trace_warn(format!("fetch failed for {url}: {e}"));
            Ok(format!("Error fetching from {url}: {e}"))
        }
    }
}

async fn concurrent_fetch(ctx: OrchestrationContext, urls: Vec<String>) -> Result<String, String> {
    durable_info!(ctx, count = urls.len(), "fanning out title fetches");
    let calls = urls.iter().map(|u| ctx.schedule_activity(FETCH_TITLE, u.as_str())).collect();
    let titles = ctx.try_join(calls).await?;
    durable_info!(ctx, "all titles fetched");
    Ok(titles.join(", "))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    durable_fanout::logging::init_tracing();

    let store = Arc::new(
        FsProvider::new("./durable-fanout-data", false)
            .await
            .context("opening ./durable-fanout-data")?,
    );
    let activities = ActivityRegistry::builder()
        .register(FETCH_TITLE, fetch_title)
        .build_result()
        .map_err(anyhow::Error::msg)?;
    let orchestrations = OrchestrationRegistry::builder()
        .register_typed(CONCURRENT_FETCH, concurrent_fetch)
        .build_result()
        .map_err(anyhow::Error::msg)?;

    let rt = Runtime::start_with_store(store, activities, orchestrations).await;
    let client = rt.client();

    let urls: Vec<String> = URLS.iter().map(|u| u.to_string()).collect();
    let instance = client.start_orchestration_typed(CONCURRENT_FETCH, &urls).await?;
    tracing::info!(instance_id = %instance, "started {CONCURRENT_FETCH}");

    let status = client.wait_for_orchestration(&instance, Duration::from_secs(60)).await;
    rt.shutdown(None).await;

    match status? {
        OrchestrationStatus::Completed { output } => {
            println!("{output}");
            Ok(())
        }
        OrchestrationStatus::Failed { details } => bail!("orchestration failed: {details}"),
        other => bail!("orchestration ended as {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_suffix_is_stripped() {
        let html = "<html><head><title>Durable Functions Overview | Microsoft Learn</title></head></html>";
        assert_eq!(extract_title(html), "Durable Functions Overview");
    }

    #[test]
    fn title_tag_is_case_insensitive_and_may_have_attributes() {
        let html = r#"<HEAD><Title lang="en">  Task Scheduler |MICROSOFT LEARN</TITLE></HEAD>"#;
        assert_eq!(extract_title(html), "Task Scheduler");
    }

    #[test]
    fn title_without_site_suffix_is_not_a_match() {
        assert_eq!(extract_title("<title>Plain page</title>"), NO_TITLE);
        assert_eq!(extract_title("<title>Learn | Microsoft Learn docs</title>"), NO_TITLE);
        assert_eq!(extract_title("<title>| Microsoft Learn</title>"), NO_TITLE);
    }

    #[test]
    fn later_title_is_used_when_first_does_not_match() {
        let html = "<svg><title>icon</title></svg><title>Scenarios | Microsoft Learn</title>";
        assert_eq!(extract_title(html), "Scenarios");
    }

    #[test]
    fn inner_pipes_stay_in_the_name() {
        let html = "<title>A | B | Microsoft Learn</title>";
        assert_eq!(extract_title(html), "A | B");
    }

    #[test]
    fn missing_title_falls_back() {
        assert_eq!(extract_title("<html><body>hi</body></html>"), NO_TITLE);
        assert_eq!(extract_title("<title>unterminated"), NO_TITLE);
    }
}
