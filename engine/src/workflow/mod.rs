//! Resumable multi-stage workflow
//!
//! A product request goes through parsing, gap analysis, an optional
//! clarification loop, research and document generation. The clarification
//! loop pauses the workflow: the caller gets the serialized state and the
//! open questions, and resumes later with answers.

pub mod agents;
pub mod engine;
pub mod state;
pub mod types;

pub use agents::default_agents;
pub use engine::{WorkflowAgents, WorkflowEngine, WorkflowOptions};
pub use state::WorkflowState;
pub use types::{
    ClarificationAnswer, ClarificationRecord, Gap, GapAnalysisInput, GapAssessment, GapDecision,
    GapSeverity, GenerationInput, MrdDocument, MrdSection, Question, QuestionSet, RequestData,
    Stage, WorkflowInput, WorkflowResponse,
};
