//! End-to-end workflow tests
//!
//! The default prompt agents run against a wiremock Gemini server. Each
//! agent is told apart by its system instruction.

use serde_json::json;
use std::sync::Arc;
use strata_engine::agent::ExecutionContext;
use strata_engine::config::{Config, GeminiConfig};
use strata_engine::llm::gemini::GeminiProvider;
use strata_engine::llm::ProviderChain;
use strata_engine::message_bus::{Event, EventType, MessageBus};
use strata_engine::workflow::{
    default_agents, ClarificationAnswer, Stage, WorkflowEngine, WorkflowInput, WorkflowResponse,
    WorkflowState,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GEMINI_PATH: &str = "/models/gemini-2.0-flash:generateContent";

fn structured(value: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{"content": {"parts": [{"text": value.to_string()}]}}],
        "usageMetadata": {"totalTokenCount": 10}
    }))
}

fn parsed_request() -> serde_json::Value {
    json!({
        "productConcept": "smart ring",
        "targetMarket": "runners",
        "fields": {"form_factor": "ring"}
    })
}

fn clarify() -> serde_json::Value {
    json!({
        "decision": "CLARIFY",
        "gaps": [{"field": "price_point", "description": "No price given", "severity": "blocking"}],
        "questions": [{
            "number": 1,
            "field": "price_point",
            "question": "What price point are you targeting?",
            "options": ["<$100", "$100-300", ">$300"]
        }]
    })
}

fn mrd() -> serde_json::Value {
    json!({
        "title": "Smart Ring for Runners",
        "executiveSummary": "A ring that tracks runs.",
        "sections": [{"heading": "Market", "body": "Growing."}]
    })
}

async fn mount(server: &MockServer, marker: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains(marker))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_research(server: &MockServer) {
    mount(
        server,
        "market research analyst",
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Runners spend heavily on wearables."}]},
                "groundingMetadata": {
                    "webSearchQueries": ["running wearables market"],
                    "groundingChunks": [
                        {"web": {"uri": "https://example.com/wearables", "title": "Wearables"}},
                        {"web": {"uri": "https://example.com/runners", "title": "Runners"}}
                    ]
                }
            }],
            "usageMetadata": {"totalTokenCount": 20}
        })),
    )
    .await;
}

/// Gap analysis asks once, then proceeds
async fn mount_gap_analysis(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(body_string_contains("You decide whether"))
        .respond_with(structured(clarify()))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    mount(
        server,
        "You decide whether",
        structured(json!({"decision": "PROCEED"})),
    )
    .await;
}

async fn gemini_server() -> MockServer {
    let server = MockServer::start().await;
    mount(&server, "You extract structured facts", structured(parsed_request())).await;
    mount_gap_analysis(&server).await;
    mount_research(&server).await;
    mount(&server, "You write market requirements", structured(mrd())).await;
    server
}

fn context(server: &MockServer, bus: Arc<MessageBus>) -> ExecutionContext {
    let chain = ProviderChain::new();
    let config = GeminiConfig {
        base_url: server.uri(),
        ..GeminiConfig::default()
    };
    chain.register(
        Arc::new(GeminiProvider::with_api_key(config, Some("test-key".into()))),
        0,
        true,
    );
    ExecutionContext::new(Arc::new(chain)).with_bus(bus)
}

fn engine() -> WorkflowEngine {
    let config = Config::default();
    WorkflowEngine::new(default_agents(&config), config.workflow.to_workflow_options())
}

fn fresh() -> WorkflowInput {
    WorkflowInput::Fresh {
        product_concept: "smart ring".into(),
        target_market: "runners".into(),
        additional_details: Some("tracks heart rate".into()),
    }
}

fn resume(state: &WorkflowResponse, answers: Option<Vec<ClarificationAnswer>>) -> WorkflowInput {
    WorkflowInput::Resume {
        existing_state: state.state.clone(),
        clarification_answers: answers,
    }
}

#[tokio::test]
async fn test_clarify_then_complete() {
    let server = gemini_server().await;
    let bus = Arc::new(MessageBus::new());
    let ctx = context(&server, Arc::clone(&bus));
    let engine = engine();

    let paused = engine.run(fresh(), &ctx).await;

    assert_eq!(paused.stage, Stage::Clarify, "{:?}", paused.error);
    assert!(paused.needs_clarification);
    let questions = paused.questions.clone().unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions.questions[0].field, "price_point");
    assert!(paused.mrd.is_none());

    let state = WorkflowState::from_json(&paused.state).unwrap();
    assert_eq!(state.request_data.fields["form_factor"], "ring");
    assert_eq!(
        state.request_data.additional_details.as_deref(),
        Some("tracks heart rate")
    );

    let answers = vec![ClarificationAnswer {
        field: "price_point".into(),
        answer: "$199".into(),
    }];
    let done = engine.run(resume(&paused, Some(answers)), &ctx).await;

    assert_eq!(done.stage, Stage::Complete, "{:?}", done.error);
    assert!(!done.needs_clarification);
    assert!(done.questions.is_none());
    assert_eq!(done.mrd.as_ref().unwrap().title, "Smart Ring for Runners");

    let sources = done.sources.as_ref().unwrap();
    assert_eq!(sources.len(), 2, "sources are deduplicated by URL");

    let state = WorkflowState::from_json(&done.state).unwrap();
    assert_eq!(state.clarification_round, 1);
    assert_eq!(state.clarification_history[0].questions.len(), 1);
    assert_eq!(state.request_data.fields["price_point"], "$199");
    let research = state.research_data.unwrap();
    assert!(!research.degraded);
    assert_eq!(research.sections.len(), 3);
    assert_eq!(research.queries, ["running wearables market"]);
}

#[tokio::test]
async fn test_resume_without_answers_returns_same_state() {
    let server = gemini_server().await;
    let ctx = context(&server, Arc::new(MessageBus::new()));
    let engine = engine();

    let paused = engine.run(fresh(), &ctx).await;
    assert_eq!(paused.stage, Stage::Clarify);

    let again = engine.run(resume(&paused, None), &ctx).await;
    assert_eq!(again.state, paused.state);
    assert_eq!(again.questions, paused.questions);

    let empty = engine.run(resume(&paused, Some(Vec::new())), &ctx).await;
    assert_eq!(empty.state, paused.state);
}

#[tokio::test]
async fn test_completed_state_is_never_modified() {
    let server = gemini_server().await;
    let ctx = context(&server, Arc::new(MessageBus::new()));
    let engine = engine();

    let paused = engine.run(fresh(), &ctx).await;
    let answers = vec![ClarificationAnswer {
        field: "price_point".into(),
        answer: "$199".into(),
    }];
    let done = engine.run(resume(&paused, Some(answers.clone())), &ctx).await;
    assert_eq!(done.stage, Stage::Complete);

    let replay = engine.run(resume(&done, Some(answers)), &ctx).await;
    assert_eq!(replay.state, done.state);
    assert_eq!(replay.stage, Stage::Complete);
    assert_eq!(replay.mrd, done.mrd);
}

#[tokio::test]
async fn test_research_outage_degrades_instead_of_failing() {
    let server = MockServer::start().await;
    mount(&server, "You extract structured facts", structured(parsed_request())).await;
    mount(
        &server,
        "You decide whether",
        structured(json!({"decision": "PROCEED"})),
    )
    .await;
    mount(
        &server,
        "market research analyst",
        ResponseTemplate::new(503).set_body_string("search backend down"),
    )
    .await;
    mount(&server, "You write market requirements", structured(mrd())).await;

    let ctx = context(&server, Arc::new(MessageBus::new()));
    let response = engine().run(fresh(), &ctx).await;

    assert_eq!(response.stage, Stage::Complete, "{:?}", response.error);
    assert!(response
        .warnings
        .iter()
        .any(|w| w.starts_with("Research failed")));

    let state = WorkflowState::from_json(&response.state).unwrap();
    assert!(state.research_data.unwrap().degraded);
}

#[tokio::test]
async fn test_escalation_ends_in_error() {
    let server = MockServer::start().await;
    mount(&server, "You extract structured facts", structured(parsed_request())).await;
    mount(
        &server,
        "You decide whether",
        structured(json!({"decision": "ESCALATE", "reason": "not a product"})),
    )
    .await;

    let ctx = context(&server, Arc::new(MessageBus::new()));
    let response = engine().run(fresh(), &ctx).await;

    assert_eq!(response.stage, Stage::Error);
    assert!(response.error.unwrap().contains("not a product"));
}

#[tokio::test]
async fn test_stage_events_are_published() {
    let server = gemini_server().await;
    let bus = Arc::new(MessageBus::new());
    let mut stages = bus.subscribe(EventType::StageChanged).await;
    let mut clarifications = bus.subscribe(EventType::ClarificationRequested).await;
    let ctx = context(&server, Arc::clone(&bus));

    engine().run(fresh(), &ctx).await;

    let mut seen = Vec::new();
    while let Ok(Event::StageChanged { to, .. }) = stages.try_recv() {
        seen.push(to);
    }
    assert_eq!(seen, ["GAP_ANALYSIS", "CLARIFY"]);

    assert_eq!(
        clarifications.try_recv().unwrap(),
        Event::ClarificationRequested {
            round: 1,
            questions: 1
        }
    );
}
