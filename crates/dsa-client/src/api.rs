//! REST client for the analysis backend.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use dsa_protocol::{
    AnalysisReport, AnalyzeAccepted, AnalyzeRequest, DashboardError, HistoryPage, HistoryQuery,
    ProviderInfo, ProviderList, ANALYZE_PATH, DEFAULT_BASE_URL, HISTORY_PATH, PROVIDERS_PATH,
};

use crate::casing::normalize_keys;

/// Boxed future returned by [`AnalysisApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DashboardError>> + Send + 'a>>;

/// Backend operations the dashboard depends on.
///
/// Implementations return normalized payloads or a [`DashboardError`]. No
/// retries happen at this layer; callers decide per call what a failure
/// means.
pub trait AnalysisApi: Send + Sync {
    /// List the configured AI providers.
    fn list_providers(&self) -> ApiFuture<'_, Vec<ProviderInfo>>;

    /// Queue an analysis. A stock that is already being analyzed by the
    /// same provider fails with [`DashboardError::DuplicateTask`].
    fn analyze_async<'a>(&'a self, request: &'a AnalyzeRequest) -> ApiFuture<'a, AnalyzeAccepted>;

    /// Fetch one page of the analysis history.
    fn history_list<'a>(&'a self, query: &'a HistoryQuery) -> ApiFuture<'a, HistoryPage>;

    /// Fetch a full report by query id (task ids double as query ids).
    fn report_detail<'a>(&'a self, query_id: &'a str) -> ApiFuture<'a, AnalysisReport>;
}

/// Configuration for [`HttpApi`].
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`AnalysisApi`] over HTTP.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(config: HttpApiConfig) -> Result<Self, DashboardError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DashboardError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_reqwest_client(client, &config.base_url))
    }

    /// Wrap an existing client, e.g. one with custom proxy or TLS settings.
    pub fn with_reqwest_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/api/v1/history/{query_id}` with the id as a single encoded segment.
    fn report_url(&self, query_id: &str) -> Result<reqwest::Url, DashboardError> {
        let invalid = |reason: String| DashboardError::Network(format!("invalid report URL: {reason}"));
        let mut url = reqwest::Url::parse(&self.url(HISTORY_PATH)).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid(self.base_url.clone()))?
            .push(query_id);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, DashboardError> {
        let response = request.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(network_error)?;

        if !(200..300).contains(&status) {
            return Err(error_from_body(status, &body));
        }
        decode_body(&body)
    }
}

impl AnalysisApi for HttpApi {
    fn list_providers(&self) -> ApiFuture<'_, Vec<ProviderInfo>> {
        Box::pin(async move {
            let list: ProviderList = self.send(self.client.get(self.url(PROVIDERS_PATH))).await?;
            Ok(list.providers)
        })
    }

    fn analyze_async<'a>(&'a self, request: &'a AnalyzeRequest) -> ApiFuture<'a, AnalyzeAccepted> {
        Box::pin(async move {
            let accepted: AnalyzeAccepted = self
                .send(self.client.post(self.url(ANALYZE_PATH)).json(request))
                .await?;
            tracing::debug!(
                task_id = %accepted.task_id,
                stock = %request.stock_code,
                model = %request.model_name,
                "Analysis queued"
            );
            Ok(accepted)
        })
    }

    fn history_list<'a>(&'a self, query: &'a HistoryQuery) -> ApiFuture<'a, HistoryPage> {
        Box::pin(async move { self.send(self.client.get(self.url(HISTORY_PATH)).query(query)).await })
    }

    fn report_detail<'a>(&'a self, query_id: &'a str) -> ApiFuture<'a, AnalysisReport> {
        Box::pin(async move {
            let url = self.report_url(query_id)?;
            self.send(self.client.get(url)).await
        })
    }
}

fn network_error(e: reqwest::Error) -> DashboardError {
    if e.is_timeout() {
        DashboardError::Network(format!("request timed out: {e}"))
    } else {
        DashboardError::Network(e.to_string())
    }
}

/// Decode a success body into `T` after key normalization.
pub(crate) fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, DashboardError> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|e| DashboardError::Decode(format!("invalid JSON: {e}")))?;
    serde_json::from_value(normalize_keys(raw)).map_err(|e| DashboardError::Decode(e.to_string()))
}

/// Map a non-success response to a [`DashboardError`].
///
/// The backend wraps structured errors in `detail`; both the wrapped and the
/// bare form are accepted. A 409 carrying `duplicate_task` becomes
/// [`DashboardError::DuplicateTask`].
pub fn error_from_body(status: u16, body: &str) -> DashboardError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let payload = parsed
        .as_ref()
        .map(|v| match v.get("detail") {
            Some(detail) if detail.is_object() => detail,
            _ => v,
        });

    let field = |name: &str| -> Option<String> {
        payload
            .and_then(|p| p.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    if status == 409 && field("error").as_deref() == Some("duplicate_task") {
        return DashboardError::DuplicateTask {
            stock_code: field("stock_code").unwrap_or_default(),
            existing_task_id: field("existing_task_id"),
        };
    }

    let message = field("message")
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|v| v.get("detail"))
                .and_then(|d| d.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("request failed with status {status}")
            } else {
                trimmed.chars().take(200).collect()
            }
        });

    DashboardError::Http { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_task_wrapped_in_detail() {
        let body = r#"{"detail":{"error":"duplicate_task","message":"busy","stock_code":"600519","existing_task_id":"t-9"}}"#;
        match error_from_body(409, body) {
            DashboardError::DuplicateTask { stock_code, existing_task_id } => {
                assert_eq!(stock_code, "600519");
                assert_eq!(existing_task_id.as_deref(), Some("t-9"));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_task_bare() {
        let body = r#"{"error":"duplicate_task","stock_code":"AAPL"}"#;
        assert!(error_from_body(409, body).is_duplicate());
    }

    #[test]
    fn conflict_without_duplicate_marker_is_http_error() {
        let body = r#"{"detail":"conflict"}"#;
        match error_from_body(409, body) {
            DashboardError::Http { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "conflict");
            }
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_and_empty_bodies() {
        match error_from_body(502, "Bad Gateway") {
            DashboardError::Http { message, .. } => assert_eq!(message, "Bad Gateway"),
            other => panic!("unexpected {other:?}"),
        }
        match error_from_body(500, "") {
            DashboardError::Http { message, .. } => {
                assert_eq!(message, "request failed with status 500")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_normalizes_snake_case() {
        let list: ProviderList = decode_body(
            r#"{"providers":[{"key":"qwen","display_name":"Qwen","provider_type":"openai_compatible","model":"qwen-turbo"}]}"#,
        )
        .unwrap();
        assert_eq!(list.providers[0].display_name, "Qwen");
        assert_eq!(list.providers[0].model_name.as_deref(), Some("qwen-turbo"));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<ProviderList, _> = decode_body("<html>");
        assert!(matches!(result, Err(DashboardError::Decode(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let api = HttpApi::with_reqwest_client(reqwest::Client::new(), "http://localhost:8000/");
        assert_eq!(api.url(PROVIDERS_PATH), "http://localhost:8000/api/v1/providers");
    }
}
