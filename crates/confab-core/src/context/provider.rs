use crate::error::{ConfabError, Result};
use serde::Serialize;
use tracing::debug;

/// External source of retrieved context for a query.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    async fn get_context_for_query(&self, query: &str, page_hint: Option<&str>) -> Result<String>;
}

/// Context provider reached over HTTP: posts the query, reads the body as text.
pub struct HttpContextProvider {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_hint: Option<&'a str>,
}

impl HttpContextProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl ContextProvider for HttpContextProvider {
    async fn get_context_for_query(&self, query: &str, page_hint: Option<&str>) -> Result<String> {
        debug!("Requesting context from {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ContextRequest { query, page_hint })
            .send()
            .await
            .map_err(|e| ConfabError::Augmentation(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConfabError::Augmentation(e.to_string()))?;

        if !status.is_success() {
            return Err(ConfabError::Augmentation(format!("{status}: {text}")));
        }
        Ok(text)
    }
}
