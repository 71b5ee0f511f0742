//! Reading the deploy tool's output.

use docsmith_core::Error;
use serde::Deserialize;
use tracing::warn;
use url::Url;

const SUMMARY_MARKER: &str = "Summary";
const ERROR_MARKER: &str = "ERROR:";

/// The deploy summary: everything from the first `Summary` marker on.
pub fn summary(output: &str) -> Option<&str> {
    output.find(SUMMARY_MARKER).map(|idx| output[idx..].trim_end())
}

#[derive(Deserialize)]
struct ChangedPages {
    urls: Vec<String>,
}

/// URLs the deploy reported as changed.
///
/// The deploy tool prints them as a single-line JSON object, `{"urls": [...]}`,
/// somewhere in its output. Entries that are not absolute http(s) URLs are
/// skipped.
pub fn changed_urls(output: &str) -> Vec<String> {
    let Some(pages) = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<ChangedPages>(line).ok())
    else {
        return Vec::new();
    };

    pages
        .urls
        .into_iter()
        .filter(|raw| match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => true,
            _ => {
                warn!(url = %raw, "Ignoring malformed changed URL");
                false
            }
        })
        .collect()
}

/// Error text a deploy tool reported on stderr, from its first `ERROR:` on.
///
/// Deploy tools may exit cleanly after reporting an error.
pub fn deploy_error(stderr: &str) -> Option<&str> {
    stderr
        .find(ERROR_MARKER)
        .map(|idx| stderr[idx..].trim_end())
}

/// Failure reason recorded for a failed deploy.
///
/// Errors the deploy tool flagged itself (`ERROR:`) name the target they
/// were pushing to.
pub fn deploy_failure_reason(target: &str, err: &Error) -> String {
    match err {
        Error::Deploy(message) if message.trim_start().starts_with(ERROR_MARKER) => {
            format!("Failed pushing to {}: {}", target, message.trim())
        }
        other => other.message().trim().to_string(),
    }
}
