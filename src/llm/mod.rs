//! Idea generation via rig-core.
//!
//! [`IdeaGenerator`] is the side-effect provider boundary: given a topic it
//! returns exactly [`IDEAS_PER_REQUEST`] ideas or fails. [`LlmGenerator`]
//! implements it against OpenAI chat completions.
//!
//! # Example
//! ```no_run
//! use hookify_worker::llm::{IdeaGenerator, openai_generator};
//! use secrecy::SecretString;
//!
//! # async fn run() -> hookify_worker::error::Result<()> {
//! let key = SecretString::from("sk-...");
//! let generator = openai_generator(&key, "gpt-4o")?;
//! let ideas = generator.generate("home espresso").await?;
//! assert_eq!(ideas.len(), 10);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::model::{GeneratedIdea, IDEAS_PER_REQUEST};
use crate::telemetry::genai::{record_token_usage, start_chat_span};

const SYSTEM_PROMPT: &str = "You generate social media content ideas.
Return ONLY valid JSON (no markdown).
Output must be a JSON array of exactly 10 objects.
Each object must have: title, hook, script, cta.
Keep each idea distinct and practical.";

const TEMPERATURE: f64 = 0.8;

#[async_trait]
pub trait IdeaGenerator: Send + Sync {
    async fn generate(&self, topic: &str) -> Result<Vec<GeneratedIdea>>;
}

/// Parse a raw model reply into exactly [`IDEAS_PER_REQUEST`] ideas.
pub fn parse_ideas(raw: &str) -> Result<Vec<GeneratedIdea>> {
    let raw = raw.trim();
    let ideas: Vec<GeneratedIdea> = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedOutput(format!("failed to parse model JSON: {e}; raw={raw:?}")))?;
    if ideas.len() != IDEAS_PER_REQUEST {
        return Err(Error::MalformedOutput(format!(
            "expected {IDEAS_PER_REQUEST} ideas, got {}",
            ideas.len()
        )));
    }
    Ok(ideas)
}

/// Chat-model backed generator.
pub struct LlmGenerator<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M: CompletionModel> LlmGenerator<M> {
    pub fn new(model: M, model_name: impl Into<String>, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            provider,
        }
    }
}

/// OpenAI-backed generator for the given model name.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn openai_generator(
    api_key: &SecretString,
    model_name: &str,
) -> Result<impl IdeaGenerator + 'static> {
    let client: rig::providers::openai::Client = rig::providers::openai::Client::new(api_key.expose_secret())
        .map_err(|e| Error::Provider(format!("failed to build OpenAI client: {e}")))?;
    Ok(LlmGenerator::new(
        client.completion_model(model_name),
        model_name,
        "openai",
    ))
}

#[async_trait]
impl<M> IdeaGenerator for LlmGenerator<M>
where
    M: CompletionModel + Send + Sync,
{
    async fn generate(&self, topic: &str) -> Result<Vec<GeneratedIdea>> {
        let span = start_chat_span(&self.model_name, self.provider);

        let response = self
            .model
            .completion_request(format!("Topic: {topic}"))
            .preamble(SYSTEM_PROMPT.to_string())
            .temperature(TEMPERATURE)
            .send()
            .instrument(span.clone())
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        record_token_usage(
            &span,
            &self.model_name,
            self.provider,
            response.usage.input_tokens,
            response.usage.output_tokens,
        );

        let raw: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        parse_ideas(&raw)
    }
}
