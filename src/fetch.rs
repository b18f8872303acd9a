use crate::error::{ArchiveError, FailureCause};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the buffer reserved up front from a declared Content-Length.
const MAX_PREALLOC: u64 = 8 << 20;

/// An opened response: the declared length, if any, and the body in chunks.
pub struct FetchBody {
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, FailureCause>>,
}

/// Obtains listings and downloads. The pipeline only talks to this trait, so
/// sources that need something other than plain HTTP plug in here.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Opens `url`; a non-2xx status is an error.
    async fn open(&self, url: &Url) -> Result<FetchBody, FailureCause>;

    /// Reads the whole body into memory. Only for listings and manifests.
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, FailureCause> {
        let mut body = self.open(url).await?;
        let hint = body.content_length.unwrap_or(0).min(MAX_PREALLOC);
        let mut buf = Vec::with_capacity(hint as usize);
        while let Some(chunk) = body.chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn open(&self, url: &Url) -> Result<FetchBody, FailureCause> {
        let resp = self.client.get(url.clone()).send().await?;

        if !resp.status().is_success() {
            return Err(FailureCause::HttpStatus(resp.status().as_u16()));
        }

        let content_length = resp.content_length();
        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(FailureCause::from))
            .boxed();
        Ok(FetchBody {
            content_length,
            chunks,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::stub::StubFetcher;
    use super::*;

    #[tokio::test]
    async fn fetch_bytes_joins_chunks() {
        let fetcher = StubFetcher::new().serve("https://example.gov/a.txt", "hello world");
        let url = Url::parse("https://example.gov/a.txt").unwrap();
        let body = fetcher.fetch_bytes(&url).await.unwrap();
        assert_eq!(&body[..], b"hello world");

        let missing = Url::parse("https://example.gov/missing").unwrap();
        assert_eq!(
            fetcher.fetch_bytes(&missing).await.unwrap_err(),
            FailureCause::HttpStatus(404)
        );
    }

    #[tokio::test]
    async fn absurd_content_length_is_not_preallocated() {
        let fetcher =
            StubFetcher::new().serve_declaring("https://example.gov/listing", "<html></html>", u64::MAX);
        let url = Url::parse("https://example.gov/listing").unwrap();
        let body = fetcher.fetch_bytes(&url).await.unwrap();
        assert_eq!(&body[..], b"<html></html>");
    }
}
