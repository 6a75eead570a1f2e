use serde::Deserialize;
use somnia_common::blake3_hash;

/// Portrait generation for new personas. The backing service is optional;
/// any failure falls back to a deterministic placeholder so character
/// creation never aborts on image trouble.
#[derive(Clone)]
pub struct ImageClient {
    http: reqwest::Client,
    api_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    url: String,
}

const PLACEHOLDER_COUNT: u8 = 8;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl ImageClient {
    pub fn new() -> Self {
        let timeout_secs = std::env::var("IMAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            api_url: std::env::var("IMAGE_API_URL").ok(),
        }
    }

    /// Returns (original_url, pixelated_url).
    pub async fn generate_portrait(&self, name: &str, description: &str) -> (String, String) {
        let original = match self.request_portrait(name, description).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("portrait generation failed for {}, using placeholder: {}", name, e);
                Self::placeholder_url(name)
            }
        };
        let pixelated = Self::pixelated_url(&original);
        (original, pixelated)
    }

    async fn request_portrait(&self, name: &str, description: &str) -> anyhow::Result<String> {
        let api_url = self
            .api_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("IMAGE_API_URL not configured"))?;

        let response = self
            .http
            .post(api_url)
            .json(&serde_json::json!({
                "prompt": format!("storybook portrait of {}: {}", name, description),
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<ImageResponse>()
            .await?;

        Ok(response.url)
    }

    /// Stable per-name placeholder so retries pick the same art.
    pub fn placeholder_url(name: &str) -> String {
        let index = blake3_hash(name.as_bytes()).hash()[0] % PLACEHOLDER_COUNT;
        format!("/assets/personas/placeholder_{:02}.png", index)
    }

    pub fn pixelated_url(original: &str) -> String {
        match original.strip_suffix(".png") {
            Some(stem) => format!("{}_px.png", stem),
            None => format!("{}?style=px", original),
        }
    }
}

impl Default for ImageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_deterministic() {
        assert_eq!(
            ImageClient::placeholder_url("Seron"),
            ImageClient::placeholder_url("Seron"),
        );
    }

    #[tokio::test]
    async fn missing_service_falls_back_to_placeholder() {
        let client = ImageClient {
            http: reqwest::Client::new(),
            api_url: None,
        };
        let (original, pixelated) = client.generate_portrait("Seron", "a caterpillar").await;
        assert_eq!(original, ImageClient::placeholder_url("Seron"));
        assert_eq!(pixelated, ImageClient::pixelated_url(&original));
    }

    #[test]
    fn pixelated_variant_derivation() {
        assert_eq!(
            ImageClient::pixelated_url("/assets/personas/placeholder_03.png"),
            "/assets/personas/placeholder_03_px.png",
        );
        assert_eq!(
            ImageClient::pixelated_url("https://cdn.example/img"),
            "https://cdn.example/img?style=px",
        );
    }
}
