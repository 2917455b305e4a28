use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hv_core::http::check_status;
use hv_core::{AuthorizedSender, HttpClient, HvError, HvResult, ServiceRequest};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::Method;
use tracing::{debug, instrument};

use crate::transport::{BlobTransport, ChunkPut, RangeResponse, COMPLETE_HEADER};
use crate::types::{BlobContext, ByteRange};
use crate::upload::{ChunkUploadSession, NegotiationResponse};

pub const NEGOTIATE_PATH: &str = "/blob/upload-session";

/// Blob transport over HTTP.
///
/// Negotiation is an authenticated service call and goes through the
/// [`AuthorizedSender`]; chunk uploads and ranged reads go straight to the
/// URLs the service hands out.
pub struct HttpBlobTransport {
    sender: Arc<dyn AuthorizedSender>,
    http: HttpClient,
}

impl HttpBlobTransport {
    pub fn new(sender: Arc<dyn AuthorizedSender>, http: HttpClient) -> Self {
        Self { sender, http }
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    #[instrument(skip(self))]
    async fn begin_upload(&self, context: &BlobContext) -> HvResult<ChunkUploadSession> {
        let path = format!("{NEGOTIATE_PATH}?{}", context.query());
        let response = self.sender.send(ServiceRequest::post(path.clone())).await?;
        let response = check_status(&path, response)?;

        let negotiation: NegotiationResponse = response
            .json()
            .map_err(|e| HvError::protocol(format!("malformed upload negotiation: {e}")))?;
        negotiation.into_session(context.is_package())
    }

    async fn put_chunk(&self, upload_url: &str, chunk: ChunkPut) -> HvResult<()> {
        let mut builder = self
            .http
            .request(Method::PUT, upload_url)
            .timeout(chunk.timeout);
        if let Some(range) = chunk.content_range() {
            builder = builder.header(CONTENT_RANGE, range);
        }
        if chunk.complete {
            builder = builder.header(COMPLETE_HEADER, "1");
        }

        self.http.send(builder.body(chunk.body)).await?;
        Ok(())
    }

    async fn get_range(&self, url: &str, range: ByteRange, timeout: Duration) -> HvResult<RangeResponse> {
        let builder = self
            .http
            .request(Method::GET, url)
            .timeout(timeout)
            .header(RANGE, range.header_value());

        let response = self.http.execute(builder).await?;
        if response.status == 416 {
            return Ok(RangeResponse::NotSatisfiable);
        }
        let response = check_status(url, response)?;

        // A 200 means the server ignored the range and sent the whole blob.
        if response.status == 200 {
            let len = response.body.len() as u64;
            if range.start >= len {
                return Ok(RangeResponse::NotSatisfiable);
            }
            debug!(url, "server ignored range header");
            let end = range.end.min(len) as usize;
            return Ok(RangeResponse::Data(response.body.slice(range.start as usize..end)));
        }
        Ok(RangeResponse::Data(response.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use hv_core::{ConnectionConfig, ServiceResponse};
    use mockito::Matcher;

    /// Unsigned sender for exercising negotiation against a mock server.
    struct PlainSender {
        http: HttpClient,
        config: ConnectionConfig,
    }

    #[async_trait]
    impl AuthorizedSender for PlainSender {
        async fn send(&self, request: ServiceRequest) -> HvResult<ServiceResponse> {
            let url = self.config.endpoint(&request.path);
            self.http
                .send(self.http.request(request.method, &url).body(request.body))
                .await
        }
    }

    fn transport(server: &mockito::Server) -> HttpBlobTransport {
        let config = ConnectionConfig::new(server.url());
        let http = HttpClient::new(&config).unwrap();
        let sender = PlainSender {
            http: http.clone(),
            config,
        };
        HttpBlobTransport::new(Arc::new(sender), http)
    }

    #[tokio::test]
    async fn negotiates_through_the_sender() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "blob-ref-url": format!("{}/upload/1", server.url()),
            "blob-chunk-size": 4096,
            "max-blob-size": 1_048_576,
            "blob-hash-algorithm": "SHA256Block",
            "blob-hash-parameters": { "block-size": 1024 }
        });
        let mock = server
            .mock("POST", Matcher::Regex(r"^/blob/upload-session".to_string()))
            .match_query(Matcher::UrlEncoded("record-id".into(), "r1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let session = transport(&server)
            .begin_upload(&BlobContext::record("p1", "r1"))
            .await
            .unwrap();

        assert_eq!(session.chunk_size, 4096);
        assert_eq!(session.hash_block_size, 1024);
        assert!(session.upload_url.ends_with("/upload/1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_negotiation_is_a_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex(r"^/blob/upload-session".to_string()))
            .with_status(200)
            .with_body(r#"{"blob-ref-url": 5}"#)
            .create_async()
            .await;

        let err = transport(&server)
            .begin_upload(&BlobContext::connect_package("pkg"))
            .await
            .unwrap_err();
        assert!(matches!(err, HvError::Protocol(_)));
    }

    #[tokio::test]
    async fn chunk_put_carries_range_and_completion_headers() {
        let mut server = mockito::Server::new_async().await;
        let middle = server
            .mock("PUT", "/upload/1")
            .match_header("content-range", "bytes 0-3/*")
            .match_header(COMPLETE_HEADER, Matcher::Missing)
            .match_body("abcd")
            .with_status(200)
            .create_async()
            .await;
        let last = server
            .mock("PUT", "/upload/1")
            .match_header("content-range", "bytes 4-5/*")
            .match_header(COMPLETE_HEADER, "1")
            .with_status(200)
            .create_async()
            .await;

        let transport = transport(&server);
        let url = format!("{}/upload/1", server.url());
        let timeout = Duration::from_secs(5);

        transport
            .put_chunk(
                &url,
                ChunkPut {
                    start: 0,
                    body: Bytes::from_static(b"abcd"),
                    complete: false,
                    timeout,
                },
            )
            .await
            .unwrap();
        transport
            .put_chunk(
                &url,
                ChunkPut {
                    start: 4,
                    body: Bytes::from_static(b"ef"),
                    complete: true,
                    timeout,
                },
            )
            .await
            .unwrap();

        middle.assert_async().await;
        last.assert_async().await;
    }

    #[tokio::test]
    async fn range_not_satisfiable_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/blob/9")
            .match_header("range", "bytes=80-99")
            .with_status(416)
            .create_async()
            .await;

        let url = format!("{}/blob/9", server.url());
        let response = transport(&server)
            .get_range(&url, ByteRange::new(80, 100), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response, RangeResponse::NotSatisfiable);
    }

    #[tokio::test]
    async fn full_body_is_sliced_when_range_is_ignored() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/blob/10")
            .with_status(200)
            .with_body("0123456789")
            .create_async()
            .await;

        let url = format!("{}/blob/10", server.url());
        let response = transport(&server)
            .get_range(&url, ByteRange::new(2, 5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response, RangeResponse::Data(Bytes::from_static(b"234")));
    }
}
