//! URL probing
//!
//! Discovers size, filename, resume and multipart support ahead of a
//! transfer. Probes follow redirects and keep cookies per host for the
//! lifetime of the probe; no error escapes this module — every failure
//! collapses into the returned `FileInfo`.

use std::collections::HashMap;

use reqwest::header;

use crate::config::SettingsSnapshot;

/// Fallback name when nothing usable can be derived from the response
pub const UNKNOWN_FILE_NAME: &str = "unknown";

/// Everything a probe can learn about a URL.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Content length, or -1 when the server does not say
    pub file_size: i64,
    /// Derived file name (Content-Disposition, else last path segment)
    pub file_name: String,
    /// Range transfers possible from an arbitrary offset
    pub supports_resume: bool,
    /// Disjoint byte ranges may be fetched concurrently
    pub supports_multipart: bool,
    /// Any non-2xx outcome, including transport failures
    pub is_file_forbidden: bool,
    /// Human-readable failure description
    pub error_message: Option<String>,
    /// URL after redirects
    pub final_url: String,
    pub content_disposition: Option<String>,
    pub mime_type: Option<String>,
}

impl FileInfo {
    fn failed(url: &str, message: String) -> Self {
        Self {
            file_size: -1,
            file_name: UNKNOWN_FILE_NAME.to_string(),
            supports_resume: false,
            supports_multipart: false,
            is_file_forbidden: true,
            error_message: Some(message),
            final_url: url.to_string(),
            content_disposition: None,
            mime_type: None,
        }
    }
}

/// Request context carried over from the originating record.
#[derive(Debug, Clone, Default)]
pub struct ProbeContext {
    /// Browser-originated requests probe with GET and browser headers
    pub browser_originated: bool,
    pub referer: Option<String>,
    pub cookie_string: Option<String>,
    pub additional_headers: HashMap<String, String>,
}

/// Probe a URL with a HEAD request (or a browser-style GET when the
/// context says so). Never returns an error.
pub async fn probe_url(
    settings: &SettingsSnapshot,
    url: &str,
    context: Option<&ProbeContext>,
) -> FileInfo {
    let client = match probe_client(settings) {
        Ok(c) => c,
        Err(e) => return FileInfo::failed(url, format!("client setup failed: {}", e)),
    };

    let browser = context.map(|c| c.browser_originated).unwrap_or(false);
    let response = if browser {
        send_probe(&client, url, context, true).await
    } else {
        match send_probe(&client, url, context, false).await {
            // Some servers refuse HEAD outright; retry as a browser GET
            Ok(resp) if resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED => {
                send_probe(&client, url, context, true).await
            }
            other => other,
        }
    };

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("Probe failed for {}: {}", url, e);
            return FileInfo::failed(url, e.to_string());
        }
    };

    let status = response.status();
    let final_url = response.url().to_string();
    let headers = response.headers().clone();
    drop(response);

    let file_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1);

    let supports_multipart = headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    let supports_resume = supports_multipart
        || headers.contains_key(header::ETAG)
        || headers.contains_key(header::LAST_MODIFIED);

    let content_disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let file_name = content_disposition
        .as_deref()
        .and_then(disposition_file_name)
        .or_else(|| last_path_segment(&final_url))
        .unwrap_or_else(|| UNKNOWN_FILE_NAME.to_string());

    let is_file_forbidden = !status.is_success();

    FileInfo {
        file_size,
        file_name,
        supports_resume,
        supports_multipart,
        is_file_forbidden,
        error_message: is_file_forbidden.then(|| format!("HTTP {}", status.as_u16())),
        final_url,
        content_disposition,
        mime_type,
    }
}

/// Whether the URL no longer serves the file. Used when a failed transfer
/// needs to distinguish an expired link from a transient fault.
pub async fn url_is_expired(settings: &SettingsSnapshot, url: &str) -> bool {
    probe_url(settings, url, None).await.is_file_forbidden
}

fn probe_client(settings: &SettingsSnapshot) -> reqwest::Result<reqwest::Client> {
    // Fresh client per probe: cookies persist per host only for the
    // probe's lifetime
    reqwest::Client::builder()
        .user_agent(settings.browser_user_agent.clone())
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(settings.http_timeout())
        .connect_timeout(settings.http_timeout())
        .build()
}

async fn send_probe(
    client: &reqwest::Client,
    url: &str,
    context: Option<&ProbeContext>,
    as_get: bool,
) -> reqwest::Result<reqwest::Response> {
    let mut request = if as_get {
        client.get(url)
    } else {
        client.head(url)
    };

    if let Some(ctx) = context {
        if let Some(referer) = &ctx.referer {
            request = request.header(header::REFERER, referer);
        }
        if let Some(cookie) = &ctx.cookie_string {
            request = request.header(header::COOKIE, cookie);
        }
        for (name, value) in &ctx.additional_headers {
            request = request.header(name.as_str(), value.as_str());
        }
    }

    request.send().await
}

/// Extract the `filename=` parameter from a Content-Disposition value.
pub fn disposition_file_name(disposition: &str) -> Option<String> {
    let lower = disposition.to_ascii_lowercase();
    let at = lower.find("filename=")?;
    let raw = disposition[at + "filename=".len()..]
        .split(';')
        .next()?
        .trim()
        .trim_matches('"')
        .trim();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quoted() {
        assert_eq!(
            disposition_file_name("attachment; filename=\"movie final.mp4\""),
            Some("movie final.mp4".to_string())
        );
    }

    #[test]
    fn disposition_bare() {
        assert_eq!(
            disposition_file_name("attachment; filename=data.bin; size=12"),
            Some("data.bin".to_string())
        );
        assert_eq!(disposition_file_name("inline"), None);
    }

    #[test]
    fn path_segment_fallback() {
        assert_eq!(
            last_path_segment("https://host.example/a/b/file.iso?sig=x"),
            Some("file.iso".to_string())
        );
        assert_eq!(last_path_segment("https://host.example/"), None);
    }
}
