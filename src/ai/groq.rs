use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{Value, json};

use super::{PromptEnhancer, response_text};
use crate::config::GroqConfig;

const CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are a Stable Diffusion prompt writer. When given a concept, \
write one concise prompt that can be used to generate an image. Begin with quality tags such as \
\"best quality\" or \"masterpiece\", then describe the scene in natural language using complete \
sentences when possible: subject, setting, lighting, composition and style. Put the most \
important elements in parentheses. Fill in details the user leaves out with choices that are \
visually interesting and complement the request. If the request is empty or vague, invent a \
unique, safe scene. Reply with the prompt only: no greeting, no explanation, no quotes.";

/// Prompt enhancement through Groq's OpenAI-compatible chat API.
pub struct GroqService {
    config: GroqConfig,
    client: Client,
}

impl GroqService {
    pub fn new(config: GroqConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl PromptEnhancer for GroqService {
    fn name(&self) -> &str {
        "Groq"
    }

    async fn enhance(&self, prompt: &str) -> Result<String> {
        if self.config.api_key.is_empty() {
            anyhow::bail!("Groq API key is missing. Set it in the config file or {}.", crate::config::GROQ_KEY_ENV);
        }
        if prompt.trim().is_empty() {
            anyhow::bail!("Nothing to enhance: prompt is empty");
        }

        let resp = self
            .client
            .post(CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&build_chat_body(&self.config, prompt))
            .send()
            .await
            .context("Groq request failed")?;

        let text = response_text(resp, "Groq").await?;
        let json: Value =
            serde_json::from_str(&text).context("Failed to parse Groq response JSON")?;
        parse_chat_content(&json)
    }
}

fn build_chat_body(config: &GroqConfig, prompt: &str) -> Value {
    json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            {
                "role": "user",
                "content": format!(
                    "Enhance this prompt using natural language and complete sentences when possible: {prompt}"
                )
            }
        ],
        "temperature": config.temperature
    })
}

fn parse_chat_content(json: &Value) -> Result<String> {
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .context("No content in Groq response")?
        .trim();

    // Models sometimes wrap the whole answer in quotes despite being told not to
    let unquoted = content
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(content)
        .trim();
    if unquoted.is_empty() {
        anyhow::bail!("Groq returned an empty prompt");
    }
    Ok(unquoted.to_string())
}
