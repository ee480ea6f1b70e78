//! Connection options and endpoint-list parsing.
//!
//! URL syntax: `ws[s]://[user[:password]@]host[:port]/channel[?client_id=<id>]`,
//! one or more pipe-separated. `ws`/`wss` are WHATWG "special" schemes, so
//! `url::Url` already applies the right default ports (80 / 443).

use std::time::Duration;

use rand::seq::SliceRandom;
use url::Url;

use crate::error::EftlError;

/// One parsed candidate endpoint from a pipe-separated URL list.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: Url,
}

impl Endpoint {
    fn parse(raw: &str) -> Result<Self, EftlError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| EftlError::InvalidArgument(format!("bad URL {raw:?}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(EftlError::InvalidArgument(format!(
                    "unsupported URL scheme {other:?} (expected ws or wss)"
                )))
            }
        }
        Ok(Self { url })
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    pub fn username(&self) -> Option<String> {
        let u = self.url.username();
        if u.is_empty() {
            None
        } else {
            Some(u.to_owned())
        }
    }

    pub fn password(&self) -> Option<String> {
        self.url.password().map(str::to_owned)
    }

    pub fn client_id_param(&self) -> Option<String> {
        self.url.query_pairs().find(|(k, _)| k == "client_id").map(|(_, v)| v.into_owned())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Parse a pipe-separated URL list (§6 EXTERNAL INTERFACES) and shuffle it
/// uniformly at random, as `connect()` does.
pub fn parse_and_shuffle_endpoints(urls: &str) -> Result<Vec<Endpoint>, EftlError> {
    let mut endpoints: Vec<Endpoint> =
        urls.split('|').map(Endpoint::parse).collect::<Result<_, _>>()?;
    if endpoints.is_empty() {
        return Err(EftlError::InvalidArgument("no URLs supplied".to_owned()));
    }
    endpoints.shuffle(&mut rand::thread_rng());
    Ok(endpoints)
}

/// Recognized configuration options (§6 table).
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub auto_reconnect_attempts: u32,
    pub auto_reconnect_max_delay: Duration,
    pub handshake_timeout: Duration,
    pub login_timeout: Duration,
    /// Retained for API parity with the reference client's polling event
    /// loop; this implementation drives progress from `tokio::select!` and
    /// never polls, so the value is accepted but unused operationally.
    pub polling_interval: Duration,
    pub trust_all: bool,
    pub trust_store: Option<std::path::PathBuf>,
    pub max_pending_acks: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            client_id: None,
            auto_reconnect_attempts: 256,
            auto_reconnect_max_delay: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(15),
            polling_interval: Duration::from_millis(200),
            trust_all: false,
            trust_store: None,
            max_pending_acks: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipe_separated_urls_with_default_ports() {
        let eps = parse_and_shuffle_endpoints("ws://a.example|wss://b.example").unwrap();
        assert_eq!(eps.len(), 2);
        let ws = eps.iter().find(|e| e.url.scheme() == "ws").unwrap();
        let wss = eps.iter().find(|e| e.url.scheme() == "wss").unwrap();
        assert_eq!(ws.url.port_or_known_default(), Some(80));
        assert_eq!(wss.url.port_or_known_default(), Some(443));
    }

    #[test]
    fn extracts_credentials_and_client_id() {
        let eps = parse_and_shuffle_endpoints(
            "ws://alice:secret@host.example/chan?client_id=c-1",
        )
        .unwrap();
        let ep = &eps[0];
        assert_eq!(ep.username().as_deref(), Some("alice"));
        assert_eq!(ep.password().as_deref(), Some("secret"));
        assert_eq!(ep.client_id_param().as_deref(), Some("c-1"));
    }

    #[test]
    fn rejects_non_ws_scheme() {
        assert!(parse_and_shuffle_endpoints("http://host").is_err());
    }

    #[test]
    fn rejects_empty_list() {
        assert!(parse_and_shuffle_endpoints("").is_err());
    }
}
