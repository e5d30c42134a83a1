//! HTTP client for the image factory.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use noderoll_core::{ImageResolver, Profile};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::debug;

use crate::error::{FactoryError, FactoryResult};
use crate::schematic::Schematic;

pub const DEFAULT_FACTORY_URL: &str = "https://factory.talos.dev";

pub(crate) const USER_AGENT: &str = concat!("noderoll/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SchematicResponse {
    #[serde(default)]
    id: String,
}

/// `<host>/installer[-secureboot]/<id>:v<version>`
pub fn installer_image_ref(host: &str, schematic_id: &str, version: &str, secureboot: bool) -> String {
    let repo = if secureboot { "installer-secureboot" } else { "installer" };
    format!("{host}/{repo}/{schematic_id}:v{version}")
}

#[derive(Debug, Clone)]
pub struct FactoryClient {
    base_url: String,
    image_host: String,
    http: reqwest::Client,
}

impl FactoryClient {
    /// An empty `base_url` selects the public factory.
    pub fn new(base_url: &str) -> FactoryResult<Self> {
        let base_url = match base_url.trim_end_matches('/') {
            "" => DEFAULT_FACTORY_URL,
            url => url,
        };
        let parsed = reqwest::Url::parse(base_url).map_err(|e| FactoryError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| FactoryError::InvalidUrl {
            url: base_url.to_string(),
            reason: "missing host".to_string(),
        })?;
        let image_host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|source| FactoryError::Http {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            base_url: base_url.to_string(),
            image_host,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Registry host that serves installer images.
    pub fn image_host(&self) -> &str {
        &self.image_host
    }

    /// Register a schematic and return its id. The factory answers 201 for
    /// a new schematic and 200 for one it already knows.
    pub async fn schematic_id(&self, schematic: &Schematic) -> FactoryResult<String> {
        let url = format!("{}/schematics", self.base_url);
        let body = serde_json::to_vec(schematic)?;
        debug!(url = %url, bytes = body.len(), "posting schematic");

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| FactoryError::Http {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(FactoryError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let parsed: SchematicResponse = resp
            .json()
            .await
            .map_err(|source| FactoryError::Decode { url, source })?;
        if parsed.id.is_empty() {
            return Err(FactoryError::EmptySchematicId);
        }
        Ok(parsed.id)
    }

    pub async fn resolve_installer_image(&self, profile: &Profile, version: &str) -> FactoryResult<String> {
        let id = self.schematic_id(&Schematic::from_profile(profile)).await?;
        let image = installer_image_ref(&self.image_host, &id, version, profile.secureboot);
        debug!(image = %image, "installer image");
        Ok(image)
    }
}

impl ImageResolver for FactoryClient {
    fn installer_image<'a>(
        &'a self,
        profile: &'a Profile,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(self.resolve_installer_image(profile, version).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::*;
    use httptest::responders::*;
    use httptest::{Expectation, Server};
    use serde_json::json;

    fn intel() -> Profile {
        Profile {
            arch: "amd64".into(),
            platform: "metal".into(),
            extensions: vec!["siderolabs/i915".into()],
            ..Default::default()
        }
    }

    fn client_for(server: &Server) -> FactoryClient {
        FactoryClient::new(&server.url_str("")).unwrap()
    }

    #[test]
    fn default_and_custom_base() {
        let client = FactoryClient::new("").unwrap();
        assert_eq!(client.base_url(), DEFAULT_FACTORY_URL);
        assert_eq!(client.image_host(), "factory.talos.dev");

        let client = FactoryClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
        assert_eq!(client.image_host(), "127.0.0.1:8080");

        assert!(matches!(
            FactoryClient::new("not a url"),
            Err(FactoryError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn image_naming() {
        assert_eq!(
            installer_image_ref("factory.talos.dev", "abc123", "1.10.0", false),
            "factory.talos.dev/installer/abc123:v1.10.0"
        );
        assert_eq!(
            installer_image_ref("factory.talos.dev", "abc123", "1.10.0", true),
            "factory.talos.dev/installer-secureboot/abc123:v1.10.0"
        );
    }

    #[tokio::test]
    async fn posts_schematic_and_builds_image() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/schematics"),
                request::headers(contains(("content-type", "application/json"))),
                request::headers(contains(("user-agent", matches("^noderoll/")))),
                request::body(json_decoded(eq(json!({
                    "customization": {
                        "systemExtensions": {"officialExtensions": ["siderolabs/i915"]}
                    }
                })))),
            ])
            .respond_with(status_code(201).body(r#"{"id":"abc123def456"}"#)),
        );
        let client = client_for(&server);

        let mut profile = intel();
        profile.secureboot = true;
        let image = client.resolve_installer_image(&profile, "1.10.0").await.unwrap();
        assert_eq!(
            image,
            format!("{}/installer-secureboot/abc123def456:v1.10.0", client.image_host())
        );
    }

    #[tokio::test]
    async fn known_schematic_is_accepted() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/schematics"),
                request::body(json_decoded(eq(json!({})))),
            ])
            .respond_with(status_code(200).body(r#"{"id":"existing"}"#)),
        );
        let client = client_for(&server);
        let id = client.schematic_id(&Schematic::default()).await.unwrap();
        assert_eq!(id, "existing");
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/schematics"))
                .respond_with(status_code(500).body("{}")),
        );
        let client = client_for(&server);
        match client.schematic_id(&Schematic::default()).await {
            Err(FactoryError::Status { status, .. }) => assert_eq!(status, 500),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/schematics"))
                .respond_with(status_code(200).body(r#"{"id":""}"#)),
        );
        let client = client_for(&server);
        assert!(matches!(
            client.schematic_id(&Schematic::default()).await,
            Err(FactoryError::EmptySchematicId)
        ));
    }

    #[tokio::test]
    async fn resolver_port_wraps_errors() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/schematics"))
                .respond_with(status_code(200).body("not json")),
        );
        let client = client_for(&server);
        let resolver: &dyn ImageResolver = &client;
        let err = resolver.installer_image(&intel(), "1.10.0").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FactoryError>(),
            Some(FactoryError::Decode { .. })
        ));
    }
}
