use std::time::Duration;
use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;
use super::errors::{Result, UploadError};
use super::response::{ChunkResponse, FileRecord, UploadRecord};
use super::types::UploadId;

pub const HEADER_IDENTIFIER: &str = "X-Upload-Identifier";
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";
pub const HEADER_TOTAL_CHUNKS: &str = "X-Total-Chunks";
/// Base64 of the original file name
pub const HEADER_FILE_NAME: &str = "X-File-Name";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One chunk on its way to the server.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub identifier: UploadId,
    pub file_name: String,
    /// 0-based
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

/// The server contract the queue depends on.
///
/// The server must accept chunks idempotently per `(identifier, chunk_index)`:
/// a chunk that was already stored is acknowledged again without a second write.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Send one chunk and return the server's verdict.
    ///
    /// A `failed` verdict comes back as `Ok(ChunkResponse::Failed)`; transport
    /// problems and unusable bodies are errors.
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkResponse>;

    /// Server-side state of an upload, used to resume after a restart.
    async fn fetch_upload(&self, identifier: &UploadId) -> Result<UploadRecord>;

    /// Finalized files with their public URLs.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpTransport {
    /// `timeout` bounds every request, so it is the per-chunk timeout.
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base = endpoint.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let endpoint = Url::parse(&base)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    fn create_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token))?);
        }

        Ok(headers)
    }

    fn upload_url(&self, identifier: &UploadId) -> Result<Url> {
        let mut url = self.endpoint.join("uploads/")?;
        url.path_segments_mut()
            .map_err(|_| UploadError::ParamError(format!("Invalid endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .push(identifier.as_str());

        Ok(url)
    }

    async fn read_body(response: Response) -> Result<(u16, Bytes)> {
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_request_error)?;
        Ok((status, body))
    }
}

fn map_request_error(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::Timeout
    } else {
        UploadError::HttpError(err)
    }
}

fn body_text(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "empty response body".to_string()
    } else {
        text.chars().take(200).collect()
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn send_chunk(&self, request: ChunkRequest) -> Result<ChunkResponse> {
        let mut headers = self.create_headers()?;
        headers.insert(HEADER_IDENTIFIER, HeaderValue::from_str(request.identifier.as_str())?);
        headers.insert(HEADER_CHUNK_INDEX, HeaderValue::from(request.chunk_index));
        headers.insert(HEADER_TOTAL_CHUNKS, HeaderValue::from(request.total_chunks));
        headers.insert(HEADER_FILE_NAME, HeaderValue::from_str(&BASE64_STANDARD.encode(&request.file_name))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));

        debug!(
            identifier = %request.identifier,
            chunk_index = request.chunk_index,
            total_chunks = request.total_chunks,
            bytes = request.payload.len(),
            "sending chunk"
        );

        let response = self.client
            .post(self.endpoint.join("uploads/chunk")?)
            .headers(headers)
            .body(request.payload)
            .send()
            .await
            .map_err(map_request_error)?;

        let (status, body) = Self::read_body(response).await?;

        if (200..300).contains(&status) {
            return ChunkResponse::parse(&body);
        }

        // Failure bodies carry the server's reason even on error statuses
        match ChunkResponse::parse(&body) {
            Ok(failed @ ChunkResponse::Failed { .. }) => Ok(failed),
            _ => Err(UploadError::server_error(status, body_text(&body))),
        }
    }

    async fn fetch_upload(&self, identifier: &UploadId) -> Result<UploadRecord> {
        let response = self.client
            .get(self.upload_url(identifier)?)
            .headers(self.create_headers()?)
            .send()
            .await
            .map_err(map_request_error)?;

        let (status, body) = Self::read_body(response).await?;
        if status == 404 {
            return Err(UploadError::NotFound(identifier.clone()));
        }
        if !(200..300).contains(&status) {
            return Err(UploadError::server_error(status, body_text(&body)));
        }

        let record = UploadRecord::parse(&body)?;
        if &record.identifier != identifier {
            return Err(UploadError::InvalidRecord(format!(
                "asked for {}, server answered {}",
                identifier, record.identifier
            )));
        }

        Ok(record)
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let response = self.client
            .get(self.endpoint.join("files")?)
            .headers(self.create_headers()?)
            .send()
            .await
            .map_err(map_request_error)?;

        let (status, body) = Self::read_body(response).await?;
        if !(200..300).contains(&status) {
            return Err(UploadError::server_error(status, body_text(&body)));
        }

        serde_json::from_slice(&body).map_err(|err| UploadError::malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_url_escapes_identifier() {
        let transport = HttpTransport::new("http://localhost:8000/api", None, DEFAULT_TIMEOUT).unwrap();
        let url = transport.upload_url(&UploadId::from("a b/c")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/uploads/a%20b%2Fc");
    }

    #[test]
    fn test_endpoint_with_trailing_slash() {
        let transport = HttpTransport::new("http://localhost:8000/api/", None, DEFAULT_TIMEOUT).unwrap();
        let url = transport.endpoint.join("uploads/chunk").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/uploads/chunk");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(HttpTransport::new("not a url", None, DEFAULT_TIMEOUT).is_err());
    }
}
