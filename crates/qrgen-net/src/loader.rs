//! `reqwest`-backed [`Fetcher`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::{Origin, Url};

use crate::{Fetcher, NetError, Request, Response, ResponseType};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Transport timeout applied when a request carries none.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
    /// Origin responses are typed against; `None` treats everything as same-origin.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("QrGenWorker/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            origin: None,
        }
    }
}

impl LoaderConfig {
    /// Type responses relative to the given origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Resource loader for fetching URLs.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
    origin: Option<Origin>,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        let origin = config.origin.as_ref().map(Url::origin);
        info!(origin = ?config.origin.as_ref().map(Url::as_str), "ResourceLoader initialized");

        Ok(Self {
            client,
            config,
            origin,
        })
    }

    fn response_type(&self, final_url: &Url) -> ResponseType {
        match self.origin {
            Some(ref origin) if final_url.origin() != *origin => ResponseType::Cors,
            _ => ResponseType::Basic,
        }
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            warn!(url = %request.url, error = %e, "Network request failed");
            NetError::from(e)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let response_type = self.response_type(&url);

        trace!(
            url = %url,
            status = %status,
            response_type = %response_type,
            content_length = ?response.content_length(),
            "Response headers received"
        );

        let (tx, rx) = mpsc::channel(16);
        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let failed = chunk.is_err();
                if tx.send(chunk.map_err(NetError::from)).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Response::streaming(url, status, headers, response_type, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("QrGenWorker/"));
        assert_eq!(config.max_redirects, 10);
        assert!(config.origin.is_none());
    }

    #[tokio::test]
    async fn test_fetch_same_origin_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles.css"))
            .and(header("accept-language", "en-US,en;q=0.9"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/css")
                    .set_body_string("body{}"),
            )
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let loader = ResourceLoader::new(LoaderConfig::default().with_origin(origin.clone())).unwrap();

        let response = loader
            .fetch(Request::get(origin.join("/styles.css").unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert_eq!(response.text().await.unwrap(), "body{}");
    }

    #[tokio::test]
    async fn test_fetch_foreign_origin_is_cors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/create-qr-code/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let worker_origin = Url::parse("https://qr.example.org/").unwrap();
        let loader = ResourceLoader::new(LoaderConfig::default().with_origin(worker_origin)).unwrap();

        let url = Url::parse(&server.uri()).unwrap().join("/v1/create-qr-code/").unwrap();
        let response = loader.fetch(Request::get(url)).await.unwrap();

        assert_eq!(response.response_type, ResponseType::Cors);
        assert_eq!(response.bytes().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        let url = Url::parse(&server.uri()).unwrap().join("/missing.js").unwrap();
        let response = loader.fetch(Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        // Port 9 (discard) is not listening on test hosts.
        let request = Request::get(Url::parse("http://127.0.0.1:9/").unwrap())
            .timeout(Duration::from_secs(2));

        let err = loader.fetch(request).await.unwrap_err();
        assert!(err.is_transport());
    }
}
