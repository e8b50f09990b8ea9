//! Client for the external descriptor extraction model.
//!
//! The model itself is a black box: image bytes in, an optional descriptor
//! out. Every failure mode (undecodable image, service error, no face) comes
//! back as `None`, which callers report as "no face detected".

use async_trait::async_trait;
use clockface_core::Descriptor;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait DescriptorExtractor: Send + Sync {
    /// Extract one face descriptor. Returns `None` when no face is found.
    async fn extract(&self, image: Vec<u8>) -> Option<Descriptor>;
}

/// Extractor backed by an HTTP model service.
///
/// Request: `POST {url}` with the raw image bytes.
/// Response: `{"descriptor": [f32, ...] | null}`.
pub struct RemoteExtractor {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    descriptor: Option<Vec<f32>>,
}

impl RemoteExtractor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DescriptorExtractor for RemoteExtractor {
    async fn extract(&self, image: Vec<u8>) -> Option<Descriptor> {
        let image = check_image(image).await?;

        let response = match self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "extractor request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(url = %self.url, status = %response.status(), "extractor returned error status");
            return None;
        }

        match response.json::<ExtractResponse>().await {
            Ok(body) => body.descriptor.map(Descriptor::new),
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "extractor returned malformed body");
                None
            }
        }
    }
}

/// Decode the image locally before shipping it to the model, so garbage
/// uploads are rejected without a network round trip.
async fn check_image(image: Vec<u8>) -> Option<Vec<u8>> {
    let checked = tokio::task::spawn_blocking(move || {
        let decoded = image::load_from_memory(&image).map(|img| (img.width(), img.height()));
        (image, decoded)
    })
    .await;

    match checked {
        Ok((image, Ok((width, height)))) => {
            tracing::debug!(width, height, bytes = image.len(), "image decoded");
            Some(image)
        }
        Ok((_, Err(e))) => {
            tracing::info!(error = %e, "image could not be decoded");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "image decode task failed");
            None
        }
    }
}
