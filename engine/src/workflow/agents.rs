//! Default prompt-driven workflow agents
//!
//! These are the agents the `strata` binary runs. Embedders can supply
//! their own [`WorkflowAgents`] instead.

use sdk::Validation;
use serde_json::json;
use std::sync::Arc;

use super::engine::WorkflowAgents;
use super::types::{GapAnalysisInput, GapAssessment, GenerationInput, MrdDocument, RequestData};
use crate::agent::{DynAgent, SearchAgent, StructuredAgent};
use crate::config::Config;
use crate::orchestrator::{ResearchData, ResearchFindings, ResearchOrchestrator};

const PARSER_INSTRUCTION: &str = "You extract structured facts from a product request. \
Return the request unchanged, adding to `fields` any concrete facts stated in the concept or \
details (e.g. price_point, form_factor, distribution_channel). Never invent values.";

const GAP_INSTRUCTION: &str = "You decide whether a product request has enough information to \
research a market requirements document. Return decision CLARIFY with numbered questions for \
blocking gaps, PROCEED when research can start, or ESCALATE with a reason when the request cannot \
be handled. Never repeat a question listed in previousQuestions.";

const RESEARCH_INSTRUCTION: &str = "You are a market research analyst. Search the web for current, \
citable facts on the given topic for the product request. Answer in concise prose.";

const GENERATOR_INSTRUCTION: &str = "You write market requirements documents. Use only the \
request, the clarification answers and the research findings provided. Flag research gaps \
explicitly instead of filling them.";

/// Research sub-agents: `(id, topic)`
const RESEARCH_TOPICS: [(&str, &str); 3] = [
    ("market-research", "market size, growth and trends"),
    ("competitor-research", "competitors, their products and positioning"),
    ("customer-research", "target customer needs, pain points and willingness to pay"),
];

fn parser() -> DynAgent<RequestData, RequestData> {
    Arc::new(
        StructuredAgent::<RequestData, RequestData>::new(
            "request-parser",
            PARSER_INSTRUCTION,
            json!({
                "productConcept": "string",
                "targetMarket": "string",
                "additionalDetails": "string or null",
                "fields": {"<field name>": "string"}
            }),
        )
        .with_validator(|request: &RequestData| {
            let mut validation = Validation::valid();
            for field in request.missing_required() {
                validation.push(format!("{} is required", field));
            }
            validation
        }),
    )
}

fn gap_analyzer() -> DynAgent<GapAnalysisInput, GapAssessment> {
    Arc::new(StructuredAgent::<GapAnalysisInput, GapAssessment>::new(
        "gap-analyzer",
        GAP_INSTRUCTION,
        json!({
            "decision": "CLARIFY | PROCEED | ESCALATE",
            "gaps": [{"field": "string", "description": "string", "severity": "blocking | important | minor"}],
            "questions": [{"number": 1, "field": "string", "question": "string", "context": "string", "options": ["string"]}],
            "reason": "string or null"
        }),
    ))
}

fn research(config: &Config) -> DynAgent<RequestData, ResearchData> {
    let agents: Vec<DynAgent<RequestData, ResearchFindings>> = RESEARCH_TOPICS
        .iter()
        .map(|(id, topic)| {
            Arc::new(SearchAgent::<RequestData>::new(*id, *topic, RESEARCH_INSTRUCTION))
                as DynAgent<RequestData, ResearchFindings>
        })
        .collect();

    let options = config
        .parallel
        .to_parallel_options()
        .with_min_successful(config.workflow.research_min_successful);

    Arc::new(
        ResearchOrchestrator::new("research", agents)
            .with_options(options)
            .with_confidence_threshold(config.workflow.research_confidence_threshold),
    )
}

fn generator() -> DynAgent<GenerationInput, MrdDocument> {
    Arc::new(StructuredAgent::<GenerationInput, MrdDocument>::new(
        "mrd-generator",
        GENERATOR_INSTRUCTION,
        json!({
            "title": "string",
            "executiveSummary": "string",
            "sections": [{"heading": "string", "body": "string"}]
        }),
    ))
}

/// Agents for the built-in market requirements workflow
pub fn default_agents(config: &Config) -> WorkflowAgents {
    WorkflowAgents {
        parser: parser(),
        gap_analyzer: gap_analyzer(),
        research: research(config),
        generator: generator(),
    }
}
