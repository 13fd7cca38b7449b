//! Research fan-out
//!
//! [`ResearchOrchestrator`] is itself an [`Agent`]: it runs every research
//! sub-agent over the same input through [`ParallelExecutor`] and merges the
//! findings. The merge is deterministic (input order wins):
//!
//! - sources are unioned and deduplicated by URL, first occurrence kept
//! - queries are unioned and deduplicated
//! - confidence is the mean over succeeded sub-agents only
//! - every failed or low-confidence sub-agent contributes a gap message

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{AgentResult, Capability, CapabilitySet, ConfigOverrides, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{ParallelExecutor, ParallelOptions};
use crate::agent::{Agent, DynAgent, ExecutionContext};
use crate::llm::Source;

/// Output of one research sub-agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchFindings {
    /// What the sub-agent was asked to look into
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub queries: Vec<String>,
    /// Self-reported confidence in `[0, 1]`
    pub confidence: f64,
}

/// One merged research topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSection {
    pub agent_id: String,
    pub topic: String,
    pub summary: String,
    pub confidence: f64,
}

/// Merged research output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchData {
    pub sections: Vec<ResearchSection>,
    pub sources: Vec<Source>,
    pub queries: Vec<String>,
    pub confidence: f64,
    pub gaps: Vec<String>,
    /// True when this is a placeholder for research that did not happen
    #[serde(default)]
    pub degraded: bool,
}

impl ResearchData {
    /// Placeholder used when research failed but the pipeline continues
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            sections: Vec::new(),
            sources: Vec::new(),
            queries: Vec::new(),
            confidence: 0.0,
            gaps: vec![reason.into()],
            degraded: true,
        }
    }

    /// Merge sub-agent results, given in the same order as `agent_ids`
    pub fn merge(
        agent_ids: &[&str],
        results: &[AgentResult<ResearchFindings>],
        confidence_threshold: f64,
    ) -> Self {
        let mut sections = Vec::new();
        let mut sources = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut queries: Vec<String> = Vec::new();
        let mut gaps = Vec::new();
        let mut confidence_sum = 0.0;

        for (agent_id, result) in agent_ids.iter().zip(results) {
            let Some(findings) = result.data() else {
                gaps.push(format!(
                    "{} failed: {}",
                    agent_id,
                    result.error().unwrap_or("unknown error")
                ));
                continue;
            };

            confidence_sum += findings.confidence;
            if findings.confidence < confidence_threshold {
                gaps.push(format!(
                    "{} returned low confidence ({:.2}) for {}",
                    agent_id, findings.confidence, findings.topic
                ));
            }

            for source in &findings.sources {
                if seen_urls.insert(source.url.clone()) {
                    sources.push(source.clone());
                }
            }
            for query in &findings.queries {
                if !queries.contains(query) {
                    queries.push(query.clone());
                }
            }

            sections.push(ResearchSection {
                agent_id: agent_id.to_string(),
                topic: findings.topic.clone(),
                summary: findings.summary.clone(),
                confidence: findings.confidence,
            });
        }

        let confidence = if sections.is_empty() {
            0.0
        } else {
            confidence_sum / sections.len() as f64
        };

        Self {
            sections,
            sources,
            queries,
            confidence,
            gaps,
            degraded: false,
        }
    }
}

/// Fans research sub-agents out and merges their findings
pub struct ResearchOrchestrator<I> {
    id: String,
    agents: Vec<DynAgent<I, ResearchFindings>>,
    options: ParallelOptions,
    confidence_threshold: f64,
}

impl<I> ResearchOrchestrator<I> {
    pub fn new(id: impl Into<String>, agents: Vec<DynAgent<I, ResearchFindings>>) -> Self {
        Self {
            id: id.into(),
            agents,
            options: ParallelOptions::default().with_min_successful(1),
            confidence_threshold: 0.5,
        }
    }

    pub fn with_options(mut self, options: ParallelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// State key holding merged data when the batch fails
    pub fn partial_key(&self) -> String {
        format!("{}.partial", self.id)
    }
}

/// Pick the error that says the most about why the batch failed
///
/// Sub-agent failures beat cancellations and timeouts, which beat the
/// batch-level summary.
fn most_informative_error(
    agent_ids: &[&str],
    results: &[AgentResult<ResearchFindings>],
    batch_error: Option<&str>,
) -> String {
    let failures: Vec<(&str, &str)> = agent_ids
        .iter()
        .zip(results)
        .filter_map(|(id, r)| r.error().map(|e| (*id, e)))
        .collect();

    let incidental = |e: &str| e.starts_with("Cancelled:") || e.contains("timed out");

    failures
        .iter()
        .find(|(_, e)| !incidental(e))
        .or_else(|| failures.first())
        .map(|(id, e)| format!("{}: {}", id, e))
        .or_else(|| batch_error.map(str::to_string))
        .unwrap_or_else(|| "research batch failed".to_string())
}

#[async_trait]
impl<I> Agent for ResearchOrchestrator<I>
where
    I: Clone + Send + Sync + 'static,
{
    type Input = I;
    type Output = ResearchData;

    fn id(&self) -> &str {
        &self.id
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new().with(Capability::WebSearch)
    }

    fn validate_input(&self, _input: &I) -> Validation {
        Validation::valid().require(
            !self.agents.is_empty(),
            format!("{} has no research agents", self.id),
        )
    }

    async fn execute_core(&self, input: &I, ctx: &ExecutionContext) -> Result<ResearchData, EngineError> {
        let child = ctx.create_child_context(self.id.as_str(), &ConfigOverrides::default());
        let inputs = vec![input.clone(); self.agents.len()];

        let batch = ParallelExecutor::new(self.options.clone())
            .execute(&self.agents, &inputs, &child)
            .await;

        let agent_ids: Vec<&str> = self.agents.iter().map(|a| a.id()).collect();
        let merged = ResearchData::merge(&agent_ids, &batch.results, self.confidence_threshold);

        if batch.success {
            if !merged.gaps.is_empty() {
                tracing::warn!("Research completed with {} gaps", merged.gaps.len());
            }
            return Ok(merged);
        }

        ctx.state_set(self.partial_key(), serde_json::to_value(&merged)?);
        let reason = most_informative_error(&agent_ids, &batch.results, batch.error.as_deref());
        tracing::error!(
            "Research failed ({} of {} succeeded): {}",
            batch.successful,
            batch.total,
            reason
        );

        Err(EngineError::Orchestration(format!(
            "{} of {} research agents succeeded; {}",
            batch.successful, batch.total, reason
        )))
    }
}
