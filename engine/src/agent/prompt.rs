//! Prompt-driven agents
//!
//! Generic agents whose whole behaviour is an instruction: the input is
//! serialised to JSON, sent to the resolved provider, and the reply is
//! decoded into the output type.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{Capability, CapabilitySet, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Agent, ExecutionContext};
use crate::llm::Message;
use crate::orchestrator::ResearchFindings;

type Validator<I> = Arc<dyn Fn(&I) -> Validation + Send + Sync>;

fn render_input<I: Serialize>(input: &I) -> Result<String, EngineError> {
    serde_json::to_string_pretty(input)
        .map_err(|e| EngineError::Agent(format!("Failed to serialise agent input: {}", e)))
}

/// Asks for structured output and decodes it into `O`
pub struct StructuredAgent<I, O> {
    id: String,
    instruction: String,
    schema: serde_json::Value,
    validator: Option<Validator<I>>,
    _io: PhantomData<fn(&I) -> O>,
}

impl<I, O> StructuredAgent<I, O> {
    /// `schema` is an example or JSON-schema document shown to the model
    pub fn new(
        id: impl Into<String>,
        instruction: impl Into<String>,
        schema: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            instruction: instruction.into(),
            schema,
            validator: None,
            _io: PhantomData,
        }
    }

    pub fn with_validator(mut self, validator: impl Fn(&I) -> Validation + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

#[async_trait]
impl<I, O> Agent for StructuredAgent<I, O>
where
    I: Serialize + Send + Sync,
    O: DeserializeOwned + Send,
{
    type Input = I;
    type Output = O;

    fn id(&self) -> &str {
        &self.id
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new().with(Capability::StructuredOutput)
    }

    fn validate_input(&self, input: &I) -> Validation {
        self.validator
            .as_ref()
            .map(|validate| validate(input))
            .unwrap_or_default()
    }

    async fn execute_core(&self, input: &I, ctx: &ExecutionContext) -> Result<O, EngineError> {
        let provider = ctx.get_provider(None)?;
        let messages = [
            Message::system(self.instruction.clone()),
            Message::user(render_input(input)?),
        ];

        let generation = provider
            .generate_structured(&messages, &self.schema)
            .await
            .map_err(|e| e.into_engine(provider.name()))?;

        if let Some(tokens) = generation.tokens_used {
            ctx.record_tokens(tokens);
        }

        serde_json::from_value(generation.value).map_err(|e| {
            EngineError::provider(
                provider.name(),
                format!("unexpected output shape for {}: {}", self.id, e),
            )
        })
    }
}

/// Research sub-agent backed by search-grounded generation
pub struct SearchAgent<I> {
    id: String,
    topic: String,
    instruction: String,
    _input: PhantomData<fn(&I)>,
}

impl<I> SearchAgent<I> {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            instruction: instruction.into(),
            _input: PhantomData,
        }
    }
}

/// Confidence grows with the number of distinct cited sources
fn source_confidence(sources: usize) -> f64 {
    if sources == 0 {
        0.3
    } else {
        (0.5 + 0.1 * sources as f64).min(0.95)
    }
}

#[async_trait]
impl<I> Agent for SearchAgent<I>
where
    I: Serialize + Send + Sync,
{
    type Input = I;
    type Output = ResearchFindings;

    fn id(&self) -> &str {
        &self.id
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
            .with(Capability::TextGeneration)
            .with(Capability::WebSearch)
    }

    async fn execute_core(
        &self,
        input: &I,
        ctx: &ExecutionContext,
    ) -> Result<ResearchFindings, EngineError> {
        let provider = ctx.get_provider(None)?;
        let messages = [
            Message::system(self.instruction.clone()),
            Message::user(format!(
                "Research topic: {}\n\nRequest:\n{}",
                self.topic,
                render_input(input)?
            )),
        ];

        let generation = provider
            .generate_with_search(&messages)
            .await
            .map_err(|e| e.into_engine(provider.name()))?;

        if let Some(tokens) = generation.tokens_used {
            ctx.record_tokens(tokens);
        }

        let summary = generation.text.trim().to_string();
        if summary.is_empty() {
            return Err(EngineError::provider(
                provider.name(),
                format!("no findings for {}", self.topic),
            ));
        }

        Ok(ResearchFindings {
            topic: self.topic.clone(),
            summary,
            confidence: source_confidence(generation.sources.len()),
            sources: generation.sources,
            queries: generation.queries,
        })
    }
}
