mod fal;
mod groq;

pub use fal::FalService;
pub use groq::GroqService;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::params::GenerationParams;

/// One image produced by a generation request.
///
/// The provider hosts the image; only its URL and reported size come back in
/// the response. Use [`fetch_bytes`] to download it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// The parsed result of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub images: Vec<GeneratedImage>,
    /// Seed the provider reports having used, if any.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Trait for hosted image-generation services.
///
/// # Example
///
/// ```rust,no_run
/// use flux_forge::ai::{FalService, ImageGenerator};
/// use flux_forge::config::FalConfig;
/// use flux_forge::params::{Dimensions, GenerationParams};
///
/// # async fn example() -> anyhow::Result<()> {
/// let service = FalService::new(FalConfig { api_key: "fal-...".into(), ..Default::default() });
/// let params = GenerationParams {
///     prompt: "a lighthouse at dusk".into(),
///     seed: 42,
///     dimensions: Dimensions::new(1024, 1024),
///     loras: Vec::new(),
///     model: "fal-ai/flux-general".into(),
///     num_images: 1,
/// };
/// let output = service.generate(&params).await?;
/// println!("First image: {}", output.images[0].url);
/// # Ok(())
/// # }
/// ```
#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    /// The display name of this service (e.g., "fal").
    fn name(&self) -> &str;
    /// Submit a generation request and wait for its result.
    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput>;
}

/// Trait for chat services that rewrite a short prompt into a detailed one.
#[async_trait::async_trait]
pub trait PromptEnhancer: Send + Sync {
    /// The display name of this service (e.g., "Groq").
    fn name(&self) -> &str;
    /// Return an enhanced version of `prompt`.
    async fn enhance(&self, prompt: &str) -> Result<String>;
}

/// Download a URL into memory, failing on any non-2xx status.
///
/// `data:` URLs (returned by providers running in sync mode) are decoded
/// locally without a request.
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    if url.starts_with("data:") {
        return decode_data_url(url);
    }

    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Image download failed: {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Image download error ({}): {}", status, text);
    }

    let bytes = resp
        .bytes()
        .await
        .context("Failed to read image response body")?;
    log::debug!("Fetched {} bytes from {url}", bytes.len());
    Ok(bytes.to_vec())
}

/// Decode a base64 `data:` URL, e.g. `data:image/png;base64,iVBOR...`.
fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let (header, payload) = url
        .split_once(',')
        .context("Malformed data URL: missing ','")?;
    if !header.ends_with(";base64") {
        anyhow::bail!("Unsupported data URL encoding: {header}");
    }
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, payload.trim())
        .context("Failed to decode base64 data URL")
}

/// Read a provider response, turning non-2xx statuses into errors.
async fn response_text(resp: reqwest::Response, provider: &str) -> Result<String> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .with_context(|| format!("Failed to read {provider} response"))?;

    if !status.is_success() {
        anyhow::bail!("{provider} API error ({}): {}", status, text);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_decoded() {
        let bytes = decode_data_url("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(bytes, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn data_url_errors() {
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[tokio::test]
    async fn fetch_bytes_handles_data_url() {
        let client = Client::new();
        let bytes = fetch_bytes(&client, "data:image/png;base64,iVBORw0KGgo=").await.unwrap();
        assert!(crate::png::is_png(&bytes));
    }

    #[test]
    fn generation_output_minimal_fields() {
        let out: GenerationOutput =
            serde_json::from_str(r#"{"images": [{"url": "https://x/y.png"}]}"#).unwrap();
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].url, "https://x/y.png");
        assert!(out.images[0].width.is_none());
        assert!(out.seed.is_none());
    }

    #[test]
    fn generation_output_ignores_unknown_fields() {
        let out: GenerationOutput = serde_json::from_str(
            r#"{
                "images": [{"url": "u", "width": 1024, "height": 768, "content_type": "image/png"}],
                "seed": 42,
                "has_nsfw_concepts": [false],
                "timings": {"inference": 1.5}
            }"#,
        )
        .unwrap();
        assert_eq!(out.seed, Some(42));
        assert_eq!(out.images[0].width, Some(1024));
        assert_eq!(out.images[0].content_type.as_deref(), Some("image/png"));
    }
}
