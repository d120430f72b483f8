//! Endpoint resolution.
//!
//! Decides whether a request goes to the locally supervised server or to a
//! remote OpenAI-compatible endpoint, and builds the URLs for each API the
//! client calls.

use std::time::Duration;

use crate::config::{Config, EndpointPreference};

/// Timeout for the remote reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Where requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// The locally supervised server.
    Local {
        /// Server root, e.g. `http://127.0.0.1:4579`.
        base_url: String,
        /// Model alias the server was started with.
        model: String,
    },
    /// A remote OpenAI-compatible server.
    Remote {
        /// Server root or `/v1` base.
        base_url: String,
        /// Bearer token.
        api_key: Option<String>,
        /// Model name on the remote server.
        model: String,
    },
}

/// Local or remote, without the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Local server.
    Local,
    /// Remote endpoint.
    Remote,
}

impl EndpointKind {
    /// Stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Local => "local",
            EndpointKind::Remote => "remote",
        }
    }
}

impl Endpoint {
    /// Endpoint of the local server on `port`.
    pub fn local(port: u16, model: impl Into<String>) -> Self {
        Endpoint::Local {
            base_url: format!("http://127.0.0.1:{port}"),
            model: model.into(),
        }
    }

    /// Local or remote.
    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Local { .. } => EndpointKind::Local,
            Endpoint::Remote { .. } => EndpointKind::Remote,
        }
    }

    /// Whether this is the remote endpoint.
    pub fn is_remote(&self) -> bool {
        self.kind() == EndpointKind::Remote
    }

    /// Model name to put in requests.
    pub fn model(&self) -> &str {
        match self {
            Endpoint::Local { model, .. } | Endpoint::Remote { model, .. } => model,
        }
    }

    /// Bearer token, if any.
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Endpoint::Local { .. } => None,
            Endpoint::Remote { api_key, .. } => api_key.as_deref(),
        }
    }

    fn root(&self) -> &str {
        let base = match self {
            Endpoint::Local { base_url, .. } | Endpoint::Remote { base_url, .. } => base_url,
        };
        base.trim_end_matches('/').trim_end_matches("/v1")
    }

    /// `…/v1/chat/completions`.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.root())
    }

    /// `…/v1/models`.
    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.root())
    }

    /// `…/health` (llama.cpp style servers).
    pub fn health_url(&self) -> String {
        format!("{}/health", self.root())
    }

    /// `…/tokenize` (llama.cpp style servers).
    pub fn tokenize_url(&self) -> String {
        format!("{}/tokenize", self.root())
    }
}

/// Pick the endpoint for the next request.
///
/// An explicit preference wins. Otherwise the remote endpoint is used only
/// when it is enabled, configured and reachable.
pub fn resolve(config: &Config, remote_reachable: bool) -> Endpoint {
    let settings = &config.endpoint;
    let remote = settings.remote_url.as_ref().map(|url| Endpoint::Remote {
        base_url: url.clone(),
        api_key: config.api_key(),
        model: settings
            .remote_model
            .clone()
            .unwrap_or_else(|| config.model.clone()),
    });
    let local = Endpoint::local(config.server.port, config.model.clone());

    let endpoint = match (settings.prefer, remote) {
        (EndpointPreference::Remote, Some(remote)) => remote,
        (EndpointPreference::Remote, None) => {
            tracing::warn!("endpoint: remote preferred but no remote_url configured, using local");
            local
        }
        (EndpointPreference::Local, _) => local,
        (EndpointPreference::Auto, Some(remote)) if settings.use_remote && remote_reachable => {
            remote
        }
        (EndpointPreference::Auto, _) => local,
    };
    tracing::debug!(kind = endpoint.kind().as_str(), url = %endpoint.chat_completions_url(), "endpoint: resolved");
    endpoint
}

/// Check whether a remote endpoint answers its models listing.
pub async fn probe_remote(base_url: &str, api_key: Option<&str>) -> bool {
    let probe = Endpoint::Remote {
        base_url: base_url.to_string(),
        api_key: None,
        model: String::new(),
    };
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "endpoint: failed to build probe client");
            return false;
        }
    };
    let mut request = client.get(probe.models_url());
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    match request.send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(error = %e, "endpoint: remote unreachable");
            false
        }
    }
}

/// Resolve the endpoint, probing the remote only when it could be chosen.
pub async fn resolve_with_probe(config: &Config) -> Endpoint {
    let settings = &config.endpoint;
    let reachable = match (&settings.remote_url, settings.prefer) {
        (Some(url), EndpointPreference::Auto) if settings.use_remote => {
            probe_remote(url, config.api_key().as_deref()).await
        }
        _ => false,
    };
    resolve(config, reachable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(remote: bool, use_remote: bool, prefer: EndpointPreference) -> Config {
        let mut config = Config::default();
        config.model = "local-model".to_string();
        config.server.port = 4579;
        if remote {
            config.endpoint.remote_url = Some("https://llm.example.com/v1".to_string());
            config.endpoint.remote_model = Some("remote-model".to_string());
        }
        config.endpoint.use_remote = use_remote;
        config.endpoint.prefer = prefer;
        config
    }

    #[test]
    fn test_auto_uses_remote_when_enabled_and_reachable() {
        let endpoint = resolve(&config(true, true, EndpointPreference::Auto), true);
        assert!(endpoint.is_remote());
        assert_eq!(endpoint.model(), "remote-model");
    }

    #[test]
    fn test_auto_falls_back_when_unreachable() {
        let endpoint = resolve(&config(true, true, EndpointPreference::Auto), false);
        assert_eq!(endpoint.kind(), EndpointKind::Local);
        assert_eq!(endpoint.model(), "local-model");
    }

    #[test]
    fn test_auto_respects_toggle() {
        let endpoint = resolve(&config(true, false, EndpointPreference::Auto), true);
        assert_eq!(endpoint.kind(), EndpointKind::Local);
    }

    #[test]
    fn test_auto_without_remote_url() {
        let endpoint = resolve(&config(false, true, EndpointPreference::Auto), true);
        assert_eq!(endpoint.kind(), EndpointKind::Local);
    }

    #[test]
    fn test_override_local_wins() {
        let endpoint = resolve(&config(true, true, EndpointPreference::Local), true);
        assert_eq!(endpoint.kind(), EndpointKind::Local);
    }

    #[test]
    fn test_override_remote_wins_even_if_unreachable() {
        let endpoint = resolve(&config(true, false, EndpointPreference::Remote), false);
        assert!(endpoint.is_remote());
    }

    #[test]
    fn test_override_remote_without_url_uses_local() {
        let endpoint = resolve(&config(false, false, EndpointPreference::Remote), true);
        assert_eq!(endpoint.kind(), EndpointKind::Local);
    }

    #[test]
    fn test_urls_local() {
        let endpoint = Endpoint::local(4579, "m");
        assert_eq!(
            endpoint.chat_completions_url(),
            "http://127.0.0.1:4579/v1/chat/completions"
        );
        assert_eq!(endpoint.health_url(), "http://127.0.0.1:4579/health");
        assert_eq!(endpoint.tokenize_url(), "http://127.0.0.1:4579/tokenize");
        assert_eq!(endpoint.models_url(), "http://127.0.0.1:4579/v1/models");
    }

    #[test]
    fn test_urls_tolerate_v1_suffix() {
        for base in ["https://x.test/v1", "https://x.test/v1/", "https://x.test"] {
            let endpoint = Endpoint::Remote {
                base_url: base.to_string(),
                api_key: None,
                model: "m".to_string(),
            };
            assert_eq!(
                endpoint.chat_completions_url(),
                "https://x.test/v1/chat/completions"
            );
        }
    }

    #[tokio::test]
    async fn test_probe_remote() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        assert!(probe_remote(&server.uri(), None).await);
        assert!(!probe_remote("http://127.0.0.1:1", None).await);
    }
}
