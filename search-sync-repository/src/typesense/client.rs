//! Typesense client implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! and `CollectionAdmin` on top of the Typesense HTTP API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::TypesenseConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::{CollectionAdmin, SearchIndexProvider};
use crate::types::{BatchOperationResult, BatchOperationSummary, CollectionInfo};
use search_sync_shared::IndexDocument;

const API_KEY_HEADER: &str = "x-typesense-api-key";

/// Typesense client implementation.
///
/// # Example
///
/// ```ignore
/// use search_sync_repository::{TypesenseClient, TypesenseConfig};
/// let config = TypesenseConfig::new("http", "localhost", 8108, "xyz");
/// let client = TypesenseClient::new(&config)?;
///
/// let mut doc = serde_json::Map::new();
/// doc.insert("id".to_string(), "42".into());
/// doc.insert("name".to_string(), "Widget".into());
/// // Creates the document, or replaces it if it already exists
/// client.upsert_documents("products", &[doc]).await?;
/// ```
pub struct TypesenseClient {
    http: Client,
    base_url: Url,
}

impl TypesenseClient {
    /// Create a new client for the node described by `config`.
    ///
    /// # Returns
    ///
    /// * `Ok(TypesenseClient)` - A new client instance
    /// * `Err(SearchIndexError)` - If the URL or API key is invalid
    pub fn new(config: &TypesenseConfig) -> Result<Self, SearchIndexError> {
        let base_url = config.base_url()?;

        let mut api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| SearchIndexError::validation(format!("Invalid API key: {}", e)))?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        info!(url = %base_url, "Created Typesense client");

        Ok(Self { http, base_url })
    }

    /// Build an endpoint URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SearchIndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SearchIndexError::connection(format!("Cannot use {} as a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SearchIndexError> {
        request
            .send()
            .await
            .map_err(|e| SearchIndexError::from_transport(&e))
    }

    async fn delete_one(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), SearchIndexError> {
        let url = self.endpoint(&["collections", collection, "documents", document_id])?;
        let response = self.send(self.http.delete(url)).await?;

        let status = response.status();

        // 404 is acceptable - the document may never have been indexed
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, SearchIndexError::DeleteError));
        }

        debug!(doc_id = %document_id, "Document deleted");
        Ok(())
    }
}

/// Classify a non-success response.
fn status_error(
    status: StatusCode,
    body: &str,
    otherwise: fn(String) -> SearchIndexError,
) -> SearchIndexError {
    let message = format!("status {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => SearchIndexError::unavailable(message),
        StatusCode::REQUEST_TIMEOUT => SearchIndexError::timeout(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SearchIndexError::connection(message),
        StatusCode::NOT_FOUND => SearchIndexError::collection(message),
        _ => otherwise(message),
    }
}

/// Encode documents as JSON lines for the import endpoint.
pub(crate) fn to_jsonl(documents: &[IndexDocument]) -> Result<String, SearchIndexError> {
    let mut body = String::new();
    for document in documents {
        let line = serde_json::to_string(document)
            .map_err(|e| SearchIndexError::validation(format!("Unserializable document: {}", e)))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

/// Match the import response (one JSON object per line, in input order)
/// against the submitted document ids.
pub(crate) fn parse_import_response(body: &str, document_ids: &[String]) -> Vec<BatchOperationResult> {
    let mut lines = body.lines().filter(|line| !line.trim().is_empty());

    document_ids
        .iter()
        .map(|id| {
            let Some(line) = lines.next() else {
                return BatchOperationResult::failed(
                    id.as_str(),
                    SearchIndexError::parse("import response has fewer lines than documents"),
                );
            };

            match serde_json::from_str::<Value>(line) {
                Ok(outcome) if outcome["success"].as_bool() == Some(true) => {
                    BatchOperationResult::succeeded(id.as_str())
                }
                Ok(outcome) => {
                    let reason = outcome["error"]
                        .as_str()
                        .unwrap_or("document rejected without a reason")
                        .to_string();
                    BatchOperationResult::failed(id.as_str(), SearchIndexError::index(reason))
                }
                Err(e) => BatchOperationResult::failed(
                    id.as_str(),
                    SearchIndexError::parse(format!("Invalid import response line: {}", e)),
                ),
            }
        })
        .collect()
}

fn document_id(document: &IndexDocument) -> Result<String, SearchIndexError> {
    match document.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(SearchIndexError::validation("Document is missing a string id")),
    }
}

fn collection_info(value: &Value) -> Result<CollectionInfo, SearchIndexError> {
    let name = value["name"]
        .as_str()
        .ok_or_else(|| SearchIndexError::parse("Collection without a name"))?
        .to_string();

    Ok(CollectionInfo {
        name,
        num_documents: value["num_documents"].as_u64().unwrap_or(0),
        fields: value["fields"].as_array().cloned().unwrap_or_default(),
    })
}

#[async_trait]
impl SearchIndexProvider for TypesenseClient {
    /// Create or replace documents with a single JSONL import request.
    ///
    /// Typesense answers an import with HTTP 200 even when some documents are
    /// rejected; per-document outcomes are read from the response lines.
    #[instrument(skip(self, documents), fields(documents = documents.len()))]
    async fn upsert_documents(
        &self,
        collection: &str,
        documents: &[IndexDocument],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        if documents.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        let document_ids = documents
            .iter()
            .map(document_id)
            .collect::<Result<Vec<_>, _>>()?;
        let body = to_jsonl(documents)?;

        let mut url = self.endpoint(&["collections", collection, "documents", "import"])?;
        url.query_pairs_mut().append_pair("action", "upsert");

        let response = self
            .send(
                self.http
                    .post(url)
                    .header(CONTENT_TYPE, "text/plain")
                    .body(body),
            )
            .await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SearchIndexError::from_transport(&e))?;

        if !status.is_success() {
            error!(status = %status, body = %text, "Import request failed");
            return Err(status_error(status, &text, SearchIndexError::IndexError));
        }

        let summary = BatchOperationSummary::from_results(parse_import_response(&text, &document_ids));
        if summary.failed > 0 {
            warn!(
                collection = %collection,
                failed = summary.failed,
                "Some documents were rejected"
            );
        }
        debug!(collection = %collection, succeeded = summary.succeeded, "Documents upserted");
        Ok(summary)
    }

    /// Delete documents one by one.
    ///
    /// A missing document counts as deleted. A connectivity failure aborts the
    /// call; any other failure is recorded against its document.
    #[instrument(skip(self, document_ids), fields(documents = document_ids.len()))]
    async fn delete_documents(
        &self,
        collection: &str,
        document_ids: &[String],
    ) -> Result<BatchOperationSummary, SearchIndexError> {
        let mut results = Vec::with_capacity(document_ids.len());

        for id in document_ids {
            match self.delete_one(collection, id).await {
                Ok(()) => results.push(BatchOperationResult::succeeded(id.as_str())),
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    warn!(doc_id = %id, error = %e, "Delete failed");
                    results.push(BatchOperationResult::failed(id.as_str(), e));
                }
            }
        }

        Ok(BatchOperationSummary::from_results(results))
    }

    async fn health_check(&self) -> Result<bool, SearchIndexError> {
        let response = self.send(self.http.get(self.endpoint(&["health"])?)).await?;
        if !response.status().is_success() {
            return Ok(false);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        Ok(body["ok"].as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl CollectionAdmin for TypesenseClient {
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>, SearchIndexError> {
        let response = self.send(self.http.get(self.endpoint(&["collections"])?)).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, SearchIndexError::CollectionError));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;

        body.as_array()
            .ok_or_else(|| SearchIndexError::parse("Expected a list of collections"))?
            .iter()
            .map(collection_info)
            .collect()
    }

    async fn retrieve_collection(
        &self,
        name: &str,
    ) -> Result<Option<CollectionInfo>, SearchIndexError> {
        let response = self
            .send(self.http.get(self.endpoint(&["collections", name])?))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, SearchIndexError::CollectionError));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        collection_info(&body).map(Some)
    }

    #[instrument(skip(self, schema), fields(collection = %schema["name"]))]
    async fn create_collection(&self, schema: &Value) -> Result<(), SearchIndexError> {
        let response = self
            .send(self.http.post(self.endpoint(&["collections"])?).json(schema))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Collection creation failed");
            return Err(status_error(status, &body, SearchIndexError::CollectionError));
        }

        info!("Collection created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, name: &str) -> Result<(), SearchIndexError> {
        let response = self
            .send(self.http.delete(self.endpoint(&["collections", name])?))
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, SearchIndexError::CollectionError));
        }

        info!("Collection deleted");
        Ok(())
    }
}
