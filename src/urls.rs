use crate::ToolError;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Read one URL per line, skipping blank lines and `#` comments
pub fn read_url_list(path: &Path) -> Result<Vec<String>, ToolError> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_url_list(&text))
}

pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Apply `limit` (0 means all), then drop duplicates
pub fn prepare_urls(mut urls: Vec<String>, limit: usize) -> Vec<String> {
    if limit > 0 {
        urls.truncate(limit);
    }
    dedupe_urls(urls)
}

fn dedupe_key(url: &str) -> Option<(String, String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };
    Some((parsed.scheme().to_string(), host, parsed.path().to_string()))
}

/// Keep the first URL per scheme, host and path; query and fragment are
/// ignored. Unparsable URLs are always kept.
pub fn dedupe_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| match dedupe_key(url) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

/// File-name slug of a URL
pub fn slugify(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let rest = rest.split(['?', '#']).next().unwrap_or_default();

    let mut slug = String::with_capacity(rest.len());
    let mut pending_dash = false;
    for c in rest.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "site".to_string()
    } else {
        slug
    }
}

pub fn validate_url(url: &str) -> Result<Url, ToolError> {
    let parsed = Url::parse(url).map_err(|e| ToolError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ToolError::InvalidUrl(format!(
            "{url}: unsupported scheme '{other}'"
        ))),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}
