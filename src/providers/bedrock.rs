//! AWS Bedrock client over the Converse API.
//!
//! Compiled only with the `bedrock` cargo feature; the AWS SDK brings a
//! sizeable dependency tree that most deployments do not need. Credentials
//! are passed in explicitly (access key, secret key, region) — the ambient
//! AWS credential chain is deliberately not consulted.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message, SystemContentBlock,
};
use tracing::instrument;

use crate::error::{LlmError, Result};
use crate::traits::{ChatMessage, ChatRole, CompletionOptions, LLMProvider, LLMResponse};

/// Bedrock provider client.
pub struct BedrockProvider {
    client: aws_sdk_bedrockruntime::Client,
    provider_id: String,
    model: String,
}

impl BedrockProvider {
    /// Create a client for `model` in `region` with static credentials.
    pub fn new(
        provider_id: impl Into<String>,
        access_key: &str,
        secret_key: &str,
        region: &str,
        model: impl Into<String>,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "scholaris-llm");
        let config = aws_sdk_bedrockruntime::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .build();

        Self {
            client: aws_sdk_bedrockruntime::Client::from_conf(config),
            provider_id: provider_id.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LLMProvider for BedrockProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_context_length(&self) -> usize {
        200_000
    }

    #[instrument(skip(self, prompt, options), fields(provider = %self.provider_id, model = %self.model))]
    async fn complete_with_options(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<LLMResponse> {
        self.chat(&[ChatMessage::user(prompt)], Some(options)).await
    }

    #[instrument(skip(self, messages, options), fields(provider = %self.provider_id, model = %self.model))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        let options = options.cloned().unwrap_or_default();

        let mut system_blocks: Vec<SystemContentBlock> = Vec::new();
        if let Some(system) = &options.system_prompt {
            system_blocks.push(SystemContentBlock::Text(system.clone()));
        }

        let mut converse_messages: Vec<Message> = Vec::new();
        for message in messages {
            let role = match message.role {
                ChatRole::System => {
                    system_blocks.push(SystemContentBlock::Text(message.content.clone()));
                    continue;
                }
                ChatRole::User => ConversationRole::User,
                ChatRole::Assistant => ConversationRole::Assistant,
            };
            let built = Message::builder()
                .role(role)
                .content(ContentBlock::Text(message.content.clone()))
                .build()
                .map_err(|e| LlmError::InvalidRequest(format!("bad message: {e}")))?;
            converse_messages.push(built);
        }

        let mut inference = InferenceConfiguration::builder();
        if let Some(temperature) = options.temperature {
            inference = inference.temperature(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            inference = inference.max_tokens(max_tokens as i32);
        }

        let output = self
            .client
            .converse()
            .model_id(&self.model)
            .set_messages(Some(converse_messages))
            .set_system((!system_blocks.is_empty()).then_some(system_blocks))
            .inference_config(inference.build())
            .send()
            .await
            .map_err(|e| LlmError::Api {
                provider: self.provider_id.clone(),
                message: e.to_string(),
            })?;

        let content = output
            .output()
            .and_then(|o| o.as_message().ok())
            .map(|m| {
                m.content()
                    .iter()
                    .filter_map(|block| block.as_text().ok())
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let mut result = LLMResponse::new(content, self.model.clone());
        if let Some(usage) = output.usage() {
            result = result.with_usage(
                usage.input_tokens().max(0) as usize,
                usage.output_tokens().max(0) as usize,
            );
        }
        result = result.with_finish_reason(output.stop_reason().as_str());
        Ok(result)
    }
}
