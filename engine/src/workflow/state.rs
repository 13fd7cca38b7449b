//! Serializable workflow state
//!
//! A [`WorkflowState`] is the whole memory of a workflow between calls. It is
//! handed to the caller as a JSON string and restored on resume. Once the
//! stage is terminal the state is never modified again.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

use super::types::{
    ClarificationAnswer, ClarificationRecord, GapAssessment, MrdDocument, QuestionSet, Question,
    RequestData, Stage,
};
use crate::orchestrator::ResearchData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub stage: Stage,
    pub request_data: RequestData,
    #[serde(default)]
    pub gap_assessment: Option<GapAssessment>,
    #[serde(default)]
    pub clarification_round: u32,
    #[serde(default)]
    pub clarification_history: Vec<ClarificationRecord>,
    #[serde(default)]
    pub research_data: Option<ResearchData>,
    #[serde(default)]
    pub output: Option<MrdDocument>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(request_data: RequestData) -> Self {
        let now = Utc::now();
        Self {
            stage: Stage::ParseRequest,
            request_data,
            gap_assessment: None,
            clarification_round: 0,
            clarification_history: Vec::new(),
            research_data: None,
            output: None,
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Restore a state produced by [`WorkflowState::to_json`]
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::StateCorrupt(format!("cannot parse workflow state: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `stage`, returning the previous one
    pub(crate) fn transition(&mut self, stage: Stage) -> Stage {
        let previous = self.stage;
        self.stage = stage;
        self.updated_at = Utc::now();
        previous
    }

    /// Move to ERROR with `error`
    pub(crate) fn fail(&mut self, error: impl Into<String>) -> Stage {
        self.error = Some(error.into());
        self.transition(Stage::Error)
    }

    /// Questions awaiting answers, if paused
    pub fn pending_questions(&self) -> Option<QuestionSet> {
        if self.stage != Stage::Clarify {
            return None;
        }
        self.gap_assessment.as_ref().map(GapAssessment::question_set)
    }

    /// Every question asked in completed rounds
    pub fn previous_questions(&self) -> Vec<Question> {
        self.clarification_history
            .iter()
            .flat_map(|record| record.questions.iter().cloned())
            .collect()
    }

    /// Record one round of answers and go back to gap analysis
    ///
    /// Answers are merged into `request_data.fields` (later answers for the
    /// same field win).
    pub(crate) fn apply_answers(&mut self, answers: Vec<ClarificationAnswer>) {
        for answer in &answers {
            self.request_data
                .fields
                .insert(answer.field.clone(), answer.answer.clone());
        }

        self.clarification_round += 1;
        self.clarification_history.push(ClarificationRecord {
            round: self.clarification_round,
            questions: self
                .pending_questions()
                .map(|set| set.questions)
                .unwrap_or_default(),
            answers,
            answered_at: Utc::now(),
        });
        self.transition(Stage::GapAnalysis);
    }
}
