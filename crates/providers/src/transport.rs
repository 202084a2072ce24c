//! Shared HTTP plumbing for the provider clients: status mapping and SSE
//! line framing.

use ragloom_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Build the shared reqwest client. Falls back to a default client if the
/// builder rejects the TLS setup.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a non-success response to a `ProviderError`, passing successes through.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    match status {
        200..=299 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        ))),
        404 => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::ModelNotFound(body))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(provider, status, body = %body, "Provider returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: body,
            })
        }
    }
}

/// Reassembles newline-delimited SSE lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    /// Append bytes and return every complete, non-comment line.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            lines.push(line);
        }
        lines
    }
}

/// The payload of a `data:` line, if the line is one.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim).filter(|d| !d.is_empty())
}

/// The name of an `event:` line, if the line is one.
pub(crate) fn sse_event(line: &str) -> Option<&str> {
    line.strip_prefix("event:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let lines = buf.push(b"1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: [DONE]"]);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut buf = LineBuffer::default();
        let lines = buf.push(b": keep-alive\n\nevent: ping\n");
        assert_eq!(lines, vec!["event: ping"]);
    }

    #[test]
    fn data_and_event_prefixes() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("data:   "), None);
        assert_eq!(sse_event("event: message_stop"), Some("message_stop"));
        assert_eq!(sse_event("data: x"), None);
    }
}
