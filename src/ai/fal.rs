use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

use super::{GenerationOutput, ImageGenerator, response_text};
use crate::config::FalConfig;
use crate::params::GenerationParams;

const QUEUE_BASE: &str = "https://queue.fal.run";

/// Image generation through fal.ai's request queue.
///
/// Requests are submitted to the queue, polled until they complete, and the
/// result is then fetched from the queue's response URL.
pub struct FalService {
    config: FalConfig,
    client: Client,
}

/// Where a submitted request can be polled and collected.
#[derive(Debug, Clone, PartialEq)]
struct QueueHandle {
    request_id: String,
    status_url: String,
    response_url: String,
    cancel_url: Option<String>,
}

/// State of a queued request.
#[derive(Debug, Clone, PartialEq)]
enum QueueStatus {
    InQueue { position: Option<u64> },
    InProgress,
    Completed,
    Failed(String),
}

impl FalService {
    pub fn new(config: FalConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn auth(&self) -> String {
        format!("Key {}", self.config.api_key)
    }

    async fn submit(&self, params: &GenerationParams) -> Result<QueueHandle> {
        let url = format!("{QUEUE_BASE}/{}", self.config.model);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .json(&build_generation_body(params))
            .send()
            .await
            .context("fal request failed")?;

        let text = response_text(resp, "fal").await?;
        let json: Value = serde_json::from_str(&text).context("Failed to parse fal queue response")?;
        parse_queue_handle(&json)
    }

    async fn status(&self, handle: &QueueHandle) -> Result<QueueStatus> {
        let resp = self
            .client
            .get(&handle.status_url)
            .header("Authorization", self.auth())
            .send()
            .await
            .context("fal status request failed")?;

        let text = response_text(resp, "fal").await?;
        let json: Value = serde_json::from_str(&text).context("Failed to parse fal status JSON")?;
        parse_queue_status(&json)
    }

    async fn result(&self, handle: &QueueHandle) -> Result<GenerationOutput> {
        let resp = self
            .client
            .get(&handle.response_url)
            .header("Authorization", self.auth())
            .send()
            .await
            .context("fal result request failed")?;

        let text = response_text(resp, "fal").await?;
        parse_generation_output(&text)
    }

    /// Best effort; the request is abandoned either way.
    async fn cancel(&self, handle: &QueueHandle) {
        let Some(ref url) = handle.cancel_url else {
            return;
        };
        match self
            .client
            .put(url)
            .header("Authorization", self.auth())
            .send()
            .await
        {
            Ok(resp) => log::debug!("fal cancel returned {}", resp.status()),
            Err(e) => log::debug!("fal cancel failed: {e}"),
        }
    }
}

#[async_trait::async_trait]
impl ImageGenerator for FalService {
    fn name(&self) -> &str {
        "fal"
    }

    async fn generate(&self, params: &GenerationParams) -> Result<GenerationOutput> {
        if self.config.api_key.is_empty() {
            anyhow::bail!("fal API key is required");
        }

        let handle = self.submit(params).await?;
        log::info!("  fal request queued: {}", handle.request_id);

        let poll = Duration::from_millis(self.config.poll_interval_ms.max(100));
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();
        let mut last = None;

        loop {
            let status = self.status(&handle).await?;
            if last.as_ref() != Some(&status) {
                log::debug!("  fal status: {status:?}");
            }

            match status {
                QueueStatus::Completed => break,
                QueueStatus::Failed(ref reason) => {
                    anyhow::bail!("fal request {} failed: {reason}", handle.request_id);
                }
                QueueStatus::InQueue { position: Some(p) } if last.is_none() => {
                    log::info!("  Queue position: {p}");
                }
                _ => {}
            }
            last = Some(status);

            if started.elapsed() >= timeout {
                self.cancel(&handle).await;
                anyhow::bail!(
                    "fal request {} timed out after {}s",
                    handle.request_id,
                    timeout.as_secs()
                );
            }
            tokio::time::sleep(poll).await;
        }

        let output = self.result(&handle).await?;
        if output.images.is_empty() {
            anyhow::bail!("fal returned no images");
        }
        log::info!(
            "  fal returned {} image(s) in {:.1}s",
            output.images.len(),
            started.elapsed().as_secs_f32()
        );
        Ok(output)
    }
}

/// Request body for a flux-general generation.
fn build_generation_body(params: &GenerationParams) -> Value {
    let loras: Vec<Value> = params
        .loras
        .iter()
        .map(|l| json!({ "path": l.path, "scale": l.scale }))
        .collect();

    json!({
        "seed": params.seed,
        "loras": loras,
        "prompt": params.prompt,
        "image_size": {
            "width": params.dimensions.width,
            "height": params.dimensions.height
        },
        "num_images": params.num_images,
        "enable_safety_checker": false,
        "output_format": "png"
    })
}

fn parse_queue_handle(json: &Value) -> Result<QueueHandle> {
    let field = |name: &str| -> Result<String> {
        json[name]
            .as_str()
            .map(String::from)
            .with_context(|| format!("No {name} in fal queue response"))
    };

    Ok(QueueHandle {
        request_id: field("request_id")?,
        status_url: field("status_url")?,
        response_url: field("response_url")?,
        cancel_url: json["cancel_url"].as_str().map(String::from),
    })
}

fn parse_queue_status(json: &Value) -> Result<QueueStatus> {
    let status = json["status"]
        .as_str()
        .context("No status in fal status response")?;

    Ok(match status {
        "IN_QUEUE" => QueueStatus::InQueue {
            position: json["queue_position"].as_u64(),
        },
        "IN_PROGRESS" => QueueStatus::InProgress,
        "COMPLETED" => match json["error"].as_str() {
            Some(err) => QueueStatus::Failed(err.to_string()),
            None => QueueStatus::Completed,
        },
        other => QueueStatus::Failed(
            json["error"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| format!("unexpected status {other}")),
        ),
    })
}

fn parse_generation_output(text: &str) -> Result<GenerationOutput> {
    let json: Value = serde_json::from_str(text).context("Failed to parse fal result JSON")?;
    // Some responses wrap the payload in "response"
    let payload = if json.get("images").is_none() && json.get("response").is_some() {
        json["response"].clone()
    } else {
        json
    };
    serde_json::from_value(payload).context("fal result does not contain an images list")
}
