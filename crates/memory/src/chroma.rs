//! Chroma knowledge store over the REST v1 API.
//!
//! The collection is resolved (or created) once at startup; an unreachable
//! server or a rejected collection is a configuration failure, not a
//! per-request one.

use async_trait::async_trait;
use ragline_core::{ConfigurationError, KnowledgeEntry, KnowledgeStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A knowledge store backed by a Chroma server.
pub struct ChromaStore {
    base_url: String,
    collection: String,
    collection_id: String,
    client: reqwest::Client,
}

impl ChromaStore {
    /// Connect to `base_url` and get-or-create `collection`.
    pub async fn connect(
        base_url: impl Into<String>,
        collection: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let collection = collection.into();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigurationError::CollectionUnavailable(e.to_string()))?;

        let url = format!("{base_url}/api/v1/collections");
        let body = CreateCollection {
            name: &collection,
            get_or_create: true,
        };

        let response = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ConfigurationError::CollectionUnavailable(format!("{collection} at {base_url}: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            return Err(ConfigurationError::CollectionUnavailable(format!(
                "{collection}: HTTP {status}: {error_body}"
            )));
        }

        let created: CollectionResponse = response.json().await.map_err(|e| {
            ConfigurationError::CollectionUnavailable(format!("{collection}: bad response: {e}"))
        })?;

        debug!(collection = %collection, id = %created.id, "Chroma collection ready");

        Ok(Self {
            base_url,
            collection,
            collection_id: created.id,
            client,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self, op: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{op}",
            self.base_url, self.collection_id
        )
    }
}

#[async_trait]
impl KnowledgeStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn upsert(&self, entry: KnowledgeEntry) -> Result<(), StoreError> {
        let body = UpsertRequest {
            ids: [entry.id.as_str()],
            embeddings: [entry.vector.as_slice()],
            documents: [entry.text.as_str()],
        };

        let response = self
            .client
            .post(self.collection_url("upsert"))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Write {
                id: entry.id.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Chroma upsert rejected");
            return Err(StoreError::Write {
                id: entry.id,
                reason: format!("HTTP {status}: {error_body}"),
            });
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<String>, StoreError> {
        let body = QueryRequest {
            query_embeddings: [vector],
            n_results: k,
            include: ["documents"],
        };

        let response = self
            .client
            .post(self.collection_url("query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            return Err(StoreError::Query(format!("HTTP {status}: {error_body}")));
        }

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Query(format!("Failed to parse response: {e}")))?;

        // One query embedding in, one result row out.
        Ok(result
            .documents
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let response = self
            .client
            .get(self.collection_url("count"))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<usize>()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to parse count: {e}")))
    }
}

// --- Chroma API types (internal) ---

#[derive(Debug, Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    ids: [&'a str; 1],
    embeddings: [&'a [f32]; 1],
    documents: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Vec<Option<String>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeChroma {
        documents: Mutex<Vec<(String, String)>>,
        queries: Mutex<Vec<Value>>,
    }

    async fn spawn_fake(state: Arc<FakeChroma>) -> String {
        let app = Router::new()
            .route(
                "/api/v1/collections",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({ "id": "col-123", "name": body["name"] }))
                }),
            )
            .route(
                "/api/v1/collections/{id}/upsert",
                post(
                    |State(s): State<Arc<FakeChroma>>,
                     Path(id): Path<String>,
                     Json(body): Json<Value>| async move {
                        assert_eq!(id, "col-123");
                        let doc_id = body["ids"][0].as_str().unwrap_or_default().to_string();
                        let text = body["documents"][0].as_str().unwrap_or_default().to_string();
                        s.documents.lock().unwrap().push((doc_id, text));
                        Json(json!(true))
                    },
                ),
            )
            .route(
                "/api/v1/collections/{id}/query",
                post(
                    |State(s): State<Arc<FakeChroma>>, Json(body): Json<Value>| async move {
                        s.queries.lock().unwrap().push(body);
                        let docs: Vec<String> = s
                            .documents
                            .lock()
                            .unwrap()
                            .iter()
                            .map(|(_, text)| text.clone())
                            .collect();
                        Json(json!({ "ids": [[]], "documents": [docs] }))
                    },
                ),
            )
            .route(
                "/api/v1/collections/{id}/count",
                get(|State(s): State<Arc<FakeChroma>>| async move {
                    Json(json!(s.documents.lock().unwrap().len()))
                }),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn upsert_query_count_against_fake_server() {
        let fake = Arc::new(FakeChroma::default());
        let url = spawn_fake(fake.clone()).await;

        let store = ChromaStore::connect(&url, "history").await.unwrap();
        assert_eq!(store.collection(), "history");

        store
            .upsert(KnowledgeEntry::new("prompt-1", "Rust has no GC", vec![0.6, 0.8]))
            .await
            .unwrap();
        store
            .upsert(KnowledgeEntry::new("response-1", "Ownership frees memory", vec![0.8, 0.6]))
            .await
            .unwrap();

        let texts = store.query(&[0.6, 0.8], 5).await.unwrap();
        assert_eq!(texts, ["Rust has no GC", "Ownership frees memory"]);
        assert_eq!(store.count().await.unwrap(), 2);

        let queries = fake.queries.lock().unwrap();
        assert_eq!(queries[0]["n_results"], 5);
        assert_eq!(queries[0]["include"][0], "documents");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_configuration_error() {
        // Bind then drop so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ChromaStore::connect(format!("http://{addr}"), "kb")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigurationError::CollectionUnavailable(_)));
    }

    #[tokio::test]
    async fn rejected_upsert_is_a_write_error() {
        let app = Router::new()
            .route(
                "/api/v1/collections",
                post(|| async { Json(json!({ "id": "c1", "name": "kb" })) }),
            )
            .route(
                "/api/v1/collections/{id}/upsert",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk full") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = ChromaStore::connect(format!("http://{addr}"), "kb").await.unwrap();
        let err = store
            .upsert(KnowledgeEntry::new("prompt-7", "x", vec![1.0]))
            .await
            .unwrap_err();
        match err {
            StoreError::Write { id, reason } => {
                assert_eq!(id, "prompt-7");
                assert!(reason.contains("500"));
            }
            other => panic!("expected write error, got {other:?}"),
        }
    }
}
