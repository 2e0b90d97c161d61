//! Mock identity provider
//!
//! A `wiremock` server answering the provider's endpoints so the gateway and
//! the full client can be exercised over real HTTP.

use apple_auth::keys::{JwkSet, PublicKeyRecord};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Running mock provider.
pub struct MockProvider {
    server: MockServer,
}

impl MockProvider {
    /// Start an empty mock provider.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the client with.
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// The underlying server, for mounting extra expectations.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `keys` from `/auth/keys`.
    pub async fn publish_keys(&self, keys: Vec<PublicKeyRecord>) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet { keys }))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the first `times` requests only.
    pub async fn publish_keys_times(&self, keys: Vec<PublicKeyRecord>, times: u64) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JwkSet { keys }))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answer `/auth/keys` with `status`.
    pub async fn fail_keys(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted expectation.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of `/auth/keys` requests received.
    pub async fn key_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/auth/keys")
            .count()
    }
}
