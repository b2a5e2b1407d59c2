//! HTTP implementation of the remote contracts.
//!
//! The server resolves the owner from the bearer token, so the `owner`
//! argument of the trait methods is not sent over the wire.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use convsync_shared::protocol::{
    ConversationMetadata, ConversationUpsert, DeleteBlobRequest, DeleteBlobResponse, ErrorBody,
    GetBlobQuery, RemoteFileEntry, SaveBlobResponse,
};
use convsync_shared::{Conversation, ConversationId, FileId, OwnerId};

use crate::error::RemoteError;
use crate::remote::{RegistryClient, RemoteBlobStore};

/// Talks to a convsync server over its JSON API.
#[derive(Clone)]
pub struct HttpSyncClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl HttpSyncClient {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Network(format!("Invalid server URL '{base_url}': {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            timeout,
        })
    }

    /// Absolute URL for `segments` below the base URL; each segment is
    /// percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Network("Server URL cannot be a base".into()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());

        debug!(status = status.as_u16(), %message, "remote request failed");
        Err(status_error(status, message))
    }

    fn transport_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Map a non-success HTTP status onto the remote error taxonomy.
fn status_error(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        other => RemoteError::Rejected {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteBlobStore for HttpSyncClient {
    async fn save(
        &self,
        _owner: &OwnerId,
        conversation: &Conversation,
    ) -> Result<FileId, RemoteError> {
        let url = self.endpoint(&["sync", "save"])?;
        let response: SaveBlobResponse = self
            .send(self.client.post(url).json(conversation))
            .await?;
        Ok(response.file_id)
    }

    async fn get(&self, _owner: &OwnerId, file_id: &FileId) -> Result<Conversation, RemoteError> {
        let url = self.endpoint(&["sync", "get"])?;
        let query = GetBlobQuery {
            file_id: file_id.clone(),
        };
        self.send(self.client.get(url).query(&query)).await
    }

    async fn list(&self, _owner: &OwnerId) -> Result<Vec<RemoteFileEntry>, RemoteError> {
        let url = self.endpoint(&["sync", "list"])?;
        self.send(self.client.get(url)).await
    }

    async fn delete(&self, _owner: &OwnerId, file_id: &FileId) -> Result<(), RemoteError> {
        let url = self.endpoint(&["sync", "delete"])?;
        let body = DeleteBlobRequest {
            file_id: file_id.clone(),
        };
        let response: DeleteBlobResponse = self.send(self.client.post(url).json(&body)).await?;
        if response.success {
            Ok(())
        } else {
            Err(RemoteError::NotFound(file_id.to_string()))
        }
    }
}

#[async_trait]
impl RegistryClient for HttpSyncClient {
    async fn upsert(
        &self,
        _owner: &OwnerId,
        upsert: &ConversationUpsert,
    ) -> Result<ConversationMetadata, RemoteError> {
        let url = self.endpoint(&["conversations"])?;
        self.send(self.client.post(url).json(upsert)).await
    }

    async fn delete(&self, _owner: &OwnerId, id: &ConversationId) -> Result<(), RemoteError> {
        let url = self.endpoint(&["conversations", id.as_str()])?;
        let _: serde_json::Value = self.send(self.client.delete(url)).await?;
        Ok(())
    }
}
