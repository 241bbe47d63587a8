use crate::config::ApiSettings;
use crate::domain::check_bundle::{
    Broker, CheckBundle, CheckBundleMetrics, CheckBundleQuery, CidKind,
};
use crate::domain::errors::ApiError;
use crate::domain::ports::CheckApi;
use crate::infrastructure::core::HttpClientFactory;
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

const AUTH_TOKEN_HEADER: &str = "X-Circonus-Auth-Token";
const APP_NAME_HEADER: &str = "X-Circonus-App-Name";

/// Check-management API client.
pub struct CirconusApiClient {
    client: ClientWithMiddleware,
    base_url: String,
    token: String,
    app: String,
}

impl CirconusApiClient {
    pub fn new(settings: &ApiSettings) -> Self {
        Self::with_client(settings, HttpClientFactory::create_api_client())
    }

    pub fn with_client(settings: &ApiSettings, client: ClientWithMiddleware) -> Self {
        Self {
            client,
            base_url: settings.url.as_str().trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            app: settings.app.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, ApiError> {
        debug!("CirconusApiClient: {} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .header(APP_NAME_HEADER, &self.app)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        request.send().await.map_err(|e| ApiError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, cid: Option<&str>) -> Result<T, ApiError> {
        let response = self.send(Method::GET, url, None).await?;
        decode(url, cid, response).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        cid: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        let payload = serde_json::to_vec(body).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let response = self.send(method, url, Some(payload)).await?;
        decode(url, cid, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    url: &str,
    cid: Option<&str>,
    response: Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound {
            cid: cid.unwrap_or(url).to_string(),
        });
    }
    let text = response.text().await.map_err(|e| ApiError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !status.is_success() {
        return Err(ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl CheckApi for CirconusApiClient {
    async fn fetch_check_bundle(&self, cid: &str) -> Result<CheckBundle, ApiError> {
        CidKind::CheckBundle.validate(cid)?;
        self.get(&self.endpoint(cid), Some(cid)).await
    }

    async fn search_check_bundles(
        &self,
        query: &CheckBundleQuery,
    ) -> Result<Vec<CheckBundle>, ApiError> {
        // reqwest-middleware has no .query(), so the query string goes on the Url
        let raw = self.endpoint("/check_bundle");
        let mut url = Url::parse(&raw).map_err(|e| ApiError::Transport {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("search", &query.to_search());
        self.get(url.as_str(), None).await
    }

    async fn create_check_bundle(&self, bundle: &CheckBundle) -> Result<CheckBundle, ApiError> {
        let url = self.endpoint("/check_bundle");
        self.send_json(Method::POST, &url, None, bundle).await
    }

    async fn fetch_brokers(&self) -> Result<Vec<Broker>, ApiError> {
        self.get(&self.endpoint("/broker"), None).await
    }

    async fn fetch_check_bundle_metrics(&self, cid: &str) -> Result<CheckBundleMetrics, ApiError> {
        CidKind::CheckBundleMetrics.validate(cid)?;
        self.get(&self.endpoint(cid), Some(cid)).await
    }

    async fn update_check_bundle_metrics(
        &self,
        metrics: &CheckBundleMetrics,
    ) -> Result<CheckBundleMetrics, ApiError> {
        CidKind::CheckBundleMetrics.validate(&metrics.cid)?;
        let url = self.endpoint(&metrics.cid);
        self.send_json(Method::PUT, &url, Some(&metrics.cid), metrics)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::check_bundle::HTTPTRAP_CHECK_TYPE;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> CirconusApiClient {
        let settings = ApiSettings {
            token: "abc123".to_string(),
            app: "trapmetrics".to_string(),
            url: Url::parse(&server.url("/v2")).expect("url"),
        };
        // no retries, so error-path tests see exactly one request
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        CirconusApiClient::with_client(&settings, client)
    }

    #[tokio::test]
    async fn test_fetch_check_bundle_sends_credentials() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/check_bundle/1234")
                    .header("X-Circonus-Auth-Token", "abc123")
                    .header("X-Circonus-App-Name", "trapmetrics");
                then.status(200).body(
                    r#"{"_cid":"/check_bundle/1234","brokers":["/broker/1"],
                        "config":{"submission_url":"https://trap.example/x"},
                        "status":"active","target":"web01","type":"httptrap"}"#,
                );
            })
            .await;

        let bundle = client_for(&server)
            .fetch_check_bundle("/check_bundle/1234")
            .await
            .expect("bundle");

        mock.assert_async().await;
        assert_eq!(bundle.cid, "/check_bundle/1234");
        assert_eq!(bundle.submission_url(), Some("https://trap.example/x"));
    }

    #[tokio::test]
    async fn test_invalid_cid_makes_no_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|_when, then| {
                then.status(200).body("{}");
            })
            .await;

        let err = client_for(&server)
            .fetch_check_bundle("/invalid")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid check bundle CID [/invalid]");
        mock.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_missing_bundle_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/check_bundle/9");
                then.status(404).body(r#"{"code":404}"#);
            })
            .await;

        let err = client_for(&server)
            .fetch_check_bundle("/check_bundle/9")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::NotFound {
                cid: "/check_bundle/9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_search_passes_expression() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v2/check_bundle")
                    .query_param("search", r#"(active:1)(type:"httptrap")(host:"web01")"#);
                then.status(200).body(r#"[{"_cid":"/check_bundle/1","type":"httptrap"}]"#);
            })
            .await;

        let query = CheckBundleQuery {
            target: "web01".to_string(),
            check_type: HTTPTRAP_CHECK_TYPE.to_string(),
            search_tag: None,
        };
        let found = client_for(&server)
            .search_check_bundles(&query)
            .await
            .expect("search");

        mock.assert_async().await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/check_bundle");
                then.status(403).body("forbidden");
            })
            .await;

        let err = client_for(&server)
            .create_check_bundle(&CheckBundle::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 403, ref body, .. } if body == "forbidden"));
    }

    #[tokio::test]
    async fn test_update_check_bundle_metrics() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v2/check_bundle_metrics/7")
                    .body_includes(r#""tags":["env:prod"]"#);
                then.status(200).body(
                    r#"{"_cid":"/check_bundle_metrics/7",
                        "metrics":[{"name":"latency","type":"histogram","status":"active","tags":["env:prod"]}]}"#,
                );
            })
            .await;

        let update = CheckBundleMetrics {
            cid: "/check_bundle_metrics/7".to_string(),
            metrics: vec![crate::domain::check_bundle::CheckBundleMetric {
                name: "latency".to_string(),
                metric_type: "histogram".to_string(),
                status: "active".to_string(),
                tags: vec!["env:prod".to_string()],
                units: None,
            }],
        };
        let stored = client_for(&server)
            .update_check_bundle_metrics(&update)
            .await
            .expect("update");

        mock.assert_async().await;
        assert_eq!(stored, update);
    }
}
