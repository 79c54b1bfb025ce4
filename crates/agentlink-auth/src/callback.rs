//! Loopback redirect listener for browser sign-in.
//!
//! After the user signs in, the identity platform redirects the browser to
//! `http://localhost:<port>/?code=...&state=...`. [`CallbackServer`] accepts
//! exactly that one request on a raw [`tokio::net::TcpListener`], answers
//! with a small HTML page, and hands the code and state back to the caller.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::{AuthError, Result};

/// The HTML page returned to the browser after the redirect.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Signed in</title>
    <style>
        body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif;
               display: flex; justify-content: center; align-items: center;
               height: 100vh; margin: 0; background: #f5f5f5; color: #333; }
        .card { text-align: center; padding: 3rem; background: white; border-radius: 12px; }
        h1 { color: #22c55e; }
    </style>
</head>
<body>
    <div class="card">
        <h1>Sign-in complete</h1>
        <p>You can close this tab and return to agentlink.</p>
    </div>
</body>
</html>"#;

/// A single-shot HTTP listener for the authorization redirect.
pub struct CallbackServer;

impl CallbackServer {
    /// Bind `127.0.0.1:{port}` and wait for the redirect.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SignInTimeout`] if `timeout_secs` elapse first.
    /// - [`AuthError::Io`] if the listener cannot bind.
    /// - [`AuthError::FlowFailed`] if the redirect carries an error or lacks
    ///   the `code`/`state` parameters.
    pub async fn start(port: u16, timeout_secs: u64) -> Result<(String, String)> {
        let addr = format!("127.0.0.1:{port}");
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(addr = %addr, "waiting for sign-in redirect");

        let timeout = tokio::time::Duration::from_secs(timeout_secs);
        match tokio::time::timeout(timeout, Self::accept_one(&listener)).await {
            Ok(inner) => inner,
            Err(_) => Err(AuthError::SignInTimeout { timeout_secs }),
        }
    }

    /// Accept a single connection, parse the request, send a response.
    async fn accept_one(listener: &TcpListener) -> Result<(String, String)> {
        let (mut stream, peer) = listener.accept().await?;
        tracing::debug!(peer = %peer, "accepted redirect connection");

        // Redirects are small GET requests.
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let parsed = Self::parse_callback_request(&request);

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            SUCCESS_HTML.len(),
            SUCCESS_HTML
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;

        parsed
    }

    /// Extract `code` and `state` from `GET /path?code=..&state=.. HTTP/1.1`.
    fn parse_callback_request(request: &str) -> Result<(String, String)> {
        let request_line = request.lines().next().ok_or_else(|| AuthError::FlowFailed {
            reason: "empty HTTP request".to_string(),
        })?;

        let path = request_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| AuthError::FlowFailed {
                reason: format!("malformed HTTP request line: {request_line}"),
            })?;

        let (_, query) = path.split_once('?').ok_or_else(|| AuthError::FlowFailed {
            reason: "redirect request has no query string".to_string(),
        })?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(AuthError::FlowFailed {
                reason: format!(
                    "identity provider returned error: {}",
                    error_description.unwrap_or(error)
                ),
            });
        }

        let code = code.ok_or_else(|| AuthError::FlowFailed {
            reason: "redirect missing 'code' parameter".to_string(),
        })?;
        let state = state.ok_or_else(|| AuthError::FlowFailed {
            reason: "redirect missing 'state' parameter".to_string(),
        })?;

        Ok((code, state))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
