//! Workflow data types
//!
//! Everything here is part of the serialized workflow state or the public
//! request/response surface, so maps are ordered (`BTreeMap`) to keep the
//! serialized form stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::llm::Source;
use crate::orchestrator::ResearchData;

/// The product request being worked on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub product_concept: String,
    pub target_market: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_details: Option<String>,
    /// Extracted and clarified fields, keyed by field name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl RequestData {
    pub fn new(
        product_concept: impl Into<String>,
        target_market: impl Into<String>,
        additional_details: Option<String>,
    ) -> Self {
        Self {
            product_concept: product_concept.into(),
            target_market: target_market.into(),
            additional_details,
            fields: BTreeMap::new(),
        }
    }

    /// Names of the required fields that are blank
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.product_concept.trim().is_empty() {
            missing.push("product_concept");
        }
        if self.target_market.trim().is_empty() {
            missing.push("target_market");
        }
        missing
    }
}

/// What gap analysis decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapDecision {
    /// Ask the user before continuing
    Clarify,
    /// Enough information to research
    Proceed,
    /// The request cannot be handled
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Blocking,
    Important,
    Minor,
}

/// One piece of missing information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub field: String,
    pub description: String,
    pub severity: GapSeverity,
}

/// A question put to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub number: u32,
    /// Request field the answer fills
    pub field: String,
    pub question: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }
}

/// Output of the gap analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAssessment {
    pub decision: GapDecision,
    #[serde(default)]
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GapAssessment {
    pub fn question_set(&self) -> QuestionSet {
        QuestionSet {
            questions: self.questions.clone(),
        }
    }

    pub fn blocking_gaps(&self) -> impl Iterator<Item = &Gap> {
        self.gaps
            .iter()
            .filter(|g| g.severity == GapSeverity::Blocking)
    }
}

/// Input of the gap analyzer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAnalysisInput {
    pub request: RequestData,
    /// Completed clarification rounds so far
    pub round: u32,
    /// Questions already asked in earlier rounds
    pub previous_questions: Vec<Question>,
}

/// The user's answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationAnswer {
    pub field: String,
    pub answer: String,
}

/// One completed clarification round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationRecord {
    pub round: u32,
    pub questions: Vec<Question>,
    pub answers: Vec<ClarificationAnswer>,
    pub answered_at: DateTime<Utc>,
}

/// Input of the document generator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    pub request: RequestData,
    pub research: ResearchData,
    pub clarifications: Vec<ClarificationRecord>,
}

/// Market requirements document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MrdDocument {
    pub title: String,
    #[serde(default)]
    pub executive_summary: String,
    pub sections: Vec<MrdSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrdSection {
    pub heading: String,
    pub body: String,
}

/// Workflow stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    ParseRequest,
    GapAnalysis,
    Clarify,
    Research,
    Generate,
    Complete,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::ParseRequest => "PARSE_REQUEST",
            Stage::GapAnalysis => "GAP_ANALYSIS",
            Stage::Clarify => "CLARIFY",
            Stage::Research => "RESEARCH",
            Stage::Generate => "GENERATE",
            Stage::Complete => "COMPLETE",
            Stage::Error => "ERROR",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a workflow run starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowInput {
    Fresh {
        product_concept: String,
        target_market: String,
        #[serde(default)]
        additional_details: Option<String>,
    },
    Resume {
        existing_state: String,
        #[serde(default)]
        clarification_answers: Option<Vec<ClarificationAnswer>>,
    },
}

/// What a workflow run hands back
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    /// Opaque serialized state, passed back on resume
    pub state: String,
    pub stage: Stage,
    pub needs_clarification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<QuestionSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrd: Option<MrdDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
