//! One-shot loopback listener for the OIDC redirect.
//!
//! The browser delivers the authorization code here. Exactly one redirect is
//! accepted per authentication attempt; the listener answers it with a
//! closable page and terminates. Unrelated paths (favicon probes and the
//! like) are answered 404 without consuming the attempt, and anything that
//! arrives after the redirect gets a terminal 410.

use keygate_core::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

const SUCCESS_PAGE: &str = "<html><body><h1>Login complete</h1>\
<p>You may close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Login failed</h1>\
<p>You may close this window; see the terminal for details.</p></body></html>";
const USED_PAGE: &str = "<html><body><h1>Already used</h1>\
<p>This login attempt has already completed.</p></body></html>";
const NOT_FOUND_PAGE: &str = "<html><body><h1>Not found</h1></body></html>";

/// What one accepted redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    pub state: String,
}

/// How a single inbound request is classified and answered.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackRequest {
    /// The redirect we are waiting for.
    Granted(AuthorizationResult),
    /// The provider refused the authorization leg.
    Denied(String),
    /// Anything that is not `/callback`; keeps the listener waiting.
    Unrelated,
    /// `/callback` without usable parameters; keeps the listener waiting.
    Malformed,
}

/// Classify the request-target of an inbound GET.
fn classify(target: &str) -> CallbackRequest {
    let Ok(url) = Url::parse(&format!("http://localhost{target}")) else {
        return CallbackRequest::Unrelated;
    };
    if url.path() != "/callback" {
        return CallbackRequest::Unrelated;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return CallbackRequest::Denied(match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        });
    }
    match (code, state) {
        (Some(code), Some(state)) => CallbackRequest::Granted(AuthorizationResult { code, state }),
        _ => CallbackRequest::Malformed,
    }
}

/// A bound loopback listener for one authentication attempt.
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
}

impl CallbackServer {
    /// Bind the redirect port. Binding happens before the browser opens so a
    /// concurrent attempt fails fast instead of stealing the redirect.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|err| {
            debug!(port, %err, "Loopback bind failed");
            Error::PortUnavailable { port }
        })?;
        let port = listener
            .local_addr()
            .map_err(|_| Error::PortUnavailable { port })?
            .port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the single redirect, for at most `timeout`.
    ///
    /// Consumes the server: once a redirect (or a provider error) has been
    /// answered, the attempt is over. Queued stragglers are answered 410
    /// before the listener drops.
    pub async fn wait(self, timeout: Duration) -> Result<AuthorizationResult> {
        let seconds = timeout.as_secs();
        match tokio::time::timeout(timeout, self.accept_redirect()).await {
            Ok(outcome) => {
                self.drain_stragglers().await;
                outcome
            }
            Err(_) => Err(Error::UserTimeout { seconds }),
        }
    }

    async fn accept_redirect(&self) -> Result<AuthorizationResult> {
        loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "Loopback accept failed; still waiting");
                    continue;
                }
            };
            debug!(%peer, "Loopback connection accepted");

            let Some(target) = read_request_target(&mut stream).await else {
                continue;
            };
            match classify(&target) {
                CallbackRequest::Granted(result) => {
                    respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
                    return Ok(result);
                }
                CallbackRequest::Denied(detail) => {
                    respond(&mut stream, "200 OK", FAILURE_PAGE).await;
                    return Err(Error::CodeExchangeFailed(format!(
                        "provider refused the login: {detail}"
                    )));
                }
                CallbackRequest::Unrelated => {
                    respond(&mut stream, "404 Not Found", NOT_FOUND_PAGE).await;
                }
                CallbackRequest::Malformed => {
                    respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
                }
            }
        }
    }

    /// Answer anything still queued on the socket with 410 before closing.
    async fn drain_stragglers(&self) {
        while let Ok(Ok((mut stream, _))) =
            tokio::time::timeout(Duration::from_millis(25), self.listener.accept()).await
        {
            if read_request_target(&mut stream).await.is_some() {
                respond(&mut stream, "410 Gone", USED_PAGE).await;
            }
        }
    }
}

/// Read the request line of a plain HTTP/1.1 GET and return its target.
async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut buf = [0u8; 4096];
    let read = stream.read(&mut buf).await.ok()?;
    let head = String::from_utf8_lossy(&buf[..read]);
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    parts.next().map(str::to_string)
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    // The page is best-effort; the flow outcome never depends on it landing.
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_get(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            classify("/callback?code=abc&state=xyz"),
            CallbackRequest::Granted(AuthorizationResult {
                code: "abc".to_string(),
                state: "xyz".to_string(),
            })
        );
        assert_eq!(classify("/favicon.ico"), CallbackRequest::Unrelated);
        assert_eq!(classify("/callback?code=abc"), CallbackRequest::Malformed);
        assert_eq!(
            classify("/callback?error=access_denied&error_description=user%20cancelled"),
            CallbackRequest::Denied("access_denied: user cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn test_second_bind_fails_fast() {
        let first = CallbackServer::bind(0).await.unwrap();
        let err = CallbackServer::bind(first.port()).await.unwrap_err();
        assert!(matches!(err, Error::PortUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_redirect_is_delivered() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let wait = tokio::spawn(server.wait(Duration::from_secs(5)));

        let response = send_get(port, "/callback?code=auth-code&state=state-1").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("close this window"));

        let result = wait.await.unwrap().unwrap();
        assert_eq!(result.code, "auth-code");
        assert_eq!(result.state, "state-1");
    }

    #[tokio::test]
    async fn test_unrelated_paths_do_not_consume_the_attempt() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let wait = tokio::spawn(server.wait(Duration::from_secs(5)));

        let response = send_get(port, "/favicon.ico").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        send_get(port, "/callback?code=c&state=s").await;
        let result = wait.await.unwrap().unwrap();
        assert_eq!(result.code, "c");
    }

    #[tokio::test]
    async fn test_provider_error_ends_the_wait() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let wait = tokio::spawn(server.wait(Duration::from_secs(5)));

        send_get(port, "/callback?error=access_denied").await;
        let err = wait.await.unwrap().unwrap_err();
        match err {
            Error::CodeExchangeFailed(detail) => assert!(detail.contains("access_denied")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_when_no_redirect_arrives() {
        let server = CallbackServer::bind(0).await.unwrap();
        let err = server.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, Error::UserTimeout { .. }));
    }
}
