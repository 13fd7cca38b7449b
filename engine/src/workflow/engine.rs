//! Workflow driver
//!
//! Drives PARSE_REQUEST → GAP_ANALYSIS → CLARIFY ↺ → RESEARCH → GENERATE
//! until the state is terminal or paused in CLARIFY. The driver never
//! returns an error: every failure, including a panic inside a stage,
//! becomes stage ERROR in the returned state.

use futures::FutureExt;
use sdk::errors::EngineError;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use super::state::WorkflowState;
use super::types::{
    ClarificationAnswer, GapAnalysisInput, GapAssessment, GapDecision, GenerationInput,
    MrdDocument, RequestData, Stage, WorkflowInput, WorkflowResponse,
};
use crate::agent::{DynAgent, ExecutionContext};
use crate::message_bus::Event;
use crate::orchestrator::parallel::panic_message;
use crate::orchestrator::ResearchData;

/// Default cap on stage transitions per call
const DEFAULT_MAX_TRANSITIONS: usize = 32;

/// The domain agents the workflow runs
#[derive(Clone)]
pub struct WorkflowAgents {
    pub parser: DynAgent<RequestData, RequestData>,
    pub gap_analyzer: DynAgent<GapAnalysisInput, GapAssessment>,
    pub research: DynAgent<RequestData, ResearchData>,
    pub generator: DynAgent<GenerationInput, MrdDocument>,
}

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Completed clarification rounds after which `Clarify` becomes `Proceed`
    pub max_clarification_rounds: Option<u32>,

    /// Guard against runaway stage loops
    pub max_transitions: usize,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_clarification_rounds: Some(3),
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        }
    }
}

pub struct WorkflowEngine {
    agents: WorkflowAgents,
    options: WorkflowOptions,
}

impl WorkflowEngine {
    pub fn new(agents: WorkflowAgents, options: WorkflowOptions) -> Self {
        Self { agents, options }
    }

    /// Start or resume a workflow
    pub async fn run(&self, input: WorkflowInput, ctx: &ExecutionContext) -> WorkflowResponse {
        let mut state = match input {
            WorkflowInput::Fresh {
                product_concept,
                target_market,
                additional_details,
            } => {
                info!("Starting workflow for {:?}", product_concept);
                WorkflowState::new(RequestData::new(
                    product_concept,
                    target_market,
                    additional_details,
                ))
            }
            WorkflowInput::Resume {
                existing_state,
                clarification_answers,
            } => {
                let mut state = match WorkflowState::from_json(&existing_state) {
                    Ok(state) => state,
                    Err(e) => {
                        error!("Cannot resume workflow: {}", e);
                        return corrupt_state_response(existing_state, e);
                    }
                };

                if state.is_terminal() {
                    debug!("Resumed a finished workflow ({})", state.stage);
                    return respond(&state, existing_state);
                }

                if state.stage == Stage::Clarify {
                    match clarification_answers.filter(|a| !a.is_empty()) {
                        Some(answers) => self.resume_with_answers(&mut state, answers, ctx).await,
                        None => {
                            debug!("Resumed without answers; re-emitting questions");
                            return respond(&state, existing_state);
                        }
                    }
                }
                state
            }
        };

        self.drive(&mut state, ctx).await;

        match state.to_json() {
            Ok(json) => respond(&state, json),
            Err(e) => {
                error!("Cannot serialise workflow state: {}", e);
                let mut response = respond(&state, String::new());
                response.error = Some(e.to_string());
                response
            }
        }
    }

    async fn resume_with_answers(
        &self,
        state: &mut WorkflowState,
        answers: Vec<ClarificationAnswer>,
        ctx: &ExecutionContext,
    ) {
        info!(
            "Applying {} answers for clarification round {}",
            answers.len(),
            state.clarification_round + 1
        );
        state.apply_answers(answers);
        ctx.emit(Event::StageChanged {
            from: Stage::Clarify.to_string(),
            to: Stage::GapAnalysis.to_string(),
        })
        .await;
    }

    /// Step until terminal, paused, or out of transitions
    async fn drive(&self, state: &mut WorkflowState, ctx: &ExecutionContext) {
        let mut transitions = 0;

        while !state.is_terminal() && state.stage != Stage::Clarify {
            if transitions >= self.options.max_transitions {
                let message = format!(
                    "Workflow exceeded {} stage transitions",
                    self.options.max_transitions
                );
                error!("{}", message);
                self.set_stage_failed(state, message, ctx).await;
                break;
            }
            transitions += 1;

            let stage = state.stage;
            let outcome = AssertUnwindSafe(self.step(state, ctx)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(
                    EngineError::Workflow(format!(
                        "stage {} panicked: {}",
                        stage,
                        panic_message(&*panic)
                    ))
                    .to_string(),
                ),
            };

            if let Some(message) = failure {
                error!("Workflow failed in {}: {}", stage, message);
                self.set_stage_failed(state, message, ctx).await;
            }
        }

        if state.is_terminal() {
            ctx.emit(Event::WorkflowFinished {
                stage: state.stage.to_string(),
                success: state.stage == Stage::Complete,
            })
            .await;
        }
    }

    async fn set_stage_failed(
        &self,
        state: &mut WorkflowState,
        message: String,
        ctx: &ExecutionContext,
    ) {
        let from = state.fail(message);
        ctx.emit(Event::StageChanged {
            from: from.to_string(),
            to: Stage::Error.to_string(),
        })
        .await;
    }

    async fn advance(&self, state: &mut WorkflowState, to: Stage, ctx: &ExecutionContext) {
        let from = state.transition(to);
        debug!("Workflow stage {} -> {}", from, to);
        ctx.emit(Event::StageChanged {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await;
    }

    async fn step(&self, state: &mut WorkflowState, ctx: &ExecutionContext) -> Result<(), EngineError> {
        match state.stage {
            Stage::ParseRequest => self.parse_request(state, ctx).await,
            Stage::GapAnalysis => self.analyze_gaps(state, ctx).await,
            Stage::Research => {
                self.research(state, ctx).await;
                Ok(())
            }
            Stage::Generate => self.generate(state, ctx).await,
            Stage::Clarify | Stage::Complete | Stage::Error => Ok(()),
        }
    }

    async fn parse_request(&self, state: &mut WorkflowState, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let missing = state.request_data.missing_required();
        if !missing.is_empty() {
            return Err(EngineError::Validation(
                missing
                    .into_iter()
                    .map(|field| format!("{} is required", field))
                    .collect(),
            ));
        }

        let result = self.agents.parser.execute(&state.request_data, ctx).await;
        let (data, error, warnings, _) = result.into_parts();
        state.warnings.extend(warnings);

        let parsed = data.ok_or_else(|| {
            EngineError::Workflow(format!(
                "request parsing failed: {}",
                error.unwrap_or_else(|| "no output".to_string())
            ))
        })?;

        // The parser may only add to the request; supplied values always win
        let supplied = std::mem::replace(&mut state.request_data, parsed);
        let current = &mut state.request_data;
        current.product_concept = supplied.product_concept;
        current.target_market = supplied.target_market;
        if supplied.additional_details.is_some() {
            current.additional_details = supplied.additional_details;
        }
        current.fields.extend(supplied.fields);

        self.advance(state, Stage::GapAnalysis, ctx).await;
        Ok(())
    }

    async fn analyze_gaps(&self, state: &mut WorkflowState, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let input = GapAnalysisInput {
            request: state.request_data.clone(),
            round: state.clarification_round,
            previous_questions: state.previous_questions(),
        };

        let result = self.agents.gap_analyzer.execute(&input, ctx).await;
        let (data, error, warnings, _) = result.into_parts();
        state.warnings.extend(warnings);

        let mut assessment = data.ok_or_else(|| {
            EngineError::Workflow(format!(
                "gap analysis failed: {}",
                error.unwrap_or_else(|| "no output".to_string())
            ))
        })?;

        if assessment.decision == GapDecision::Clarify {
            let exhausted = self
                .options
                .max_clarification_rounds
                .filter(|&max| state.clarification_round >= max);

            if let Some(max) = exhausted {
                let message = format!(
                    "Clarification limit of {} rounds reached; proceeding with available information",
                    max
                );
                warn!("{}", message);
                state.warnings.push(message);
                assessment.decision = GapDecision::Proceed;
            } else if assessment.questions.is_empty() {
                let message =
                    "Gap analysis asked for clarification without questions; proceeding".to_string();
                warn!("{}", message);
                state.warnings.push(message);
                assessment.decision = GapDecision::Proceed;
            }
        }

        let decision = assessment.decision;
        let reason = assessment.reason.clone();
        let questions = assessment.questions.len();
        state.gap_assessment = Some(assessment);

        match decision {
            GapDecision::Clarify => {
                self.advance(state, Stage::Clarify, ctx).await;
                ctx.emit(Event::ClarificationRequested {
                    round: state.clarification_round + 1,
                    questions,
                })
                .await;
                info!("Workflow paused for {} clarification questions", questions);
                Ok(())
            }
            GapDecision::Proceed => {
                self.advance(state, Stage::Research, ctx).await;
                Ok(())
            }
            GapDecision::Escalate => Err(EngineError::Workflow(format!(
                "request escalated: {}",
                reason.unwrap_or_else(|| "no reason given".to_string())
            ))),
        }
    }

    /// Research never fails the workflow
    async fn research(&self, state: &mut WorkflowState, ctx: &ExecutionContext) {
        let result = self.agents.research.execute(&state.request_data, ctx).await;
        let (data, error, warnings, _) = result.into_parts();
        state.warnings.extend(warnings);

        let research = match data {
            Some(research) => research,
            None => {
                let reason = format!(
                    "Research failed: {}",
                    error.unwrap_or_else(|| "no output".to_string())
                );
                warn!("{}; continuing with fallback research data", reason);
                state.warnings.push(format!("{}; continuing without research", reason));
                ResearchData::fallback(reason)
            }
        };

        state.research_data = Some(research);
        self.advance(state, Stage::Generate, ctx).await;
    }

    async fn generate(&self, state: &mut WorkflowState, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let input = GenerationInput {
            request: state.request_data.clone(),
            research: state
                .research_data
                .clone()
                .unwrap_or_else(|| ResearchData::fallback("Research stage was skipped")),
            clarifications: state.clarification_history.clone(),
        };

        let result = self.agents.generator.execute(&input, ctx).await;
        let (data, error, warnings, _) = result.into_parts();
        state.warnings.extend(warnings);

        let document = data.ok_or_else(|| {
            EngineError::Workflow(format!(
                "document generation failed: {}",
                error.unwrap_or_else(|| "no output".to_string())
            ))
        })?;

        state.output = Some(document);
        self.advance(state, Stage::Complete, ctx).await;
        info!("Workflow complete");
        Ok(())
    }
}

fn respond(state: &WorkflowState, serialized: String) -> WorkflowResponse {
    let sources = state
        .research_data
        .as_ref()
        .filter(|_| state.stage == Stage::Complete)
        .map(|r| r.sources.clone());

    WorkflowResponse {
        state: serialized,
        stage: state.stage,
        needs_clarification: state.stage == Stage::Clarify,
        questions: state.pending_questions(),
        mrd: state.output.clone(),
        sources,
        warnings: state.warnings.clone(),
        error: state.error.clone(),
    }
}

fn corrupt_state_response(existing_state: String, err: EngineError) -> WorkflowResponse {
    WorkflowResponse {
        state: existing_state,
        stage: Stage::Error,
        needs_clarification: false,
        questions: None,
        mrd: None,
        sources: None,
        warnings: Vec::new(),
        error: Some(err.to_string()),
    }
}
