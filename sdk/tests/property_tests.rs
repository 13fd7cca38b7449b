use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};
use sdk::{
    AgentConfig, AgentMetadata, AgentResult, Capability, CapabilitySet, ConfigOverrides,
};

// Every error variant carries a static, non-empty hint that never echoes the
// raw message back to the user.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "[a-z]{12,40}") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::Validation(vec![error_str.clone()]),
            EngineError::NotFound(error_str.clone()),
            EngineError::NoProviderAvailable,
            EngineError::provider("ollama", error_str.clone()),
            EngineError::AllProvidersFailed(error_str.clone()),
            EngineError::Timeout { agent: error_str.clone(), timeout_ms: 10 },
            EngineError::Cancelled(error_str.clone()),
            EngineError::Orchestration(error_str.clone()),
            EngineError::Workflow(error_str.clone()),
            EngineError::StateCorrupt(error_str.clone()),
            EngineError::Agent(error_str.clone()),
            EngineError::Io(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&error_str));
            prop_assert!(err.to_string().contains(&error_str) || matches!(err, EngineError::NoProviderAvailable));
        }
    }
}

// A result is successful exactly when it carries data
proptest! {
    #[test]
    fn test_agent_result_invariant(
        value in any::<i64>(),
        error in "[a-z ]{1,20}",
        warnings in prop::collection::vec("[a-z]{1,8}", 0..4),
    ) {
        let ok = AgentResult::ok(value, AgentMetadata::default()).with_warnings(warnings.clone());
        prop_assert!(ok.is_success());
        prop_assert_eq!(ok.data(), Some(&value));
        prop_assert!(ok.error().is_none());
        prop_assert_eq!(ok.warnings(), warnings.as_slice());

        let failed: AgentResult<i64> = AgentResult::failure(error.clone(), AgentMetadata::default())
            .with_warnings(warnings);
        prop_assert!(!failed.is_success());
        prop_assert!(failed.data().is_none());
        prop_assert_eq!(failed.error(), Some(error.as_str()));
        prop_assert_eq!(failed.into_result(), Err(error));
    }
}

fn capability_strategy() -> impl Strategy<Value = Capability> {
    prop::sample::select(Capability::ALL.to_vec())
}

// `missing` is set difference, and a set never misses its own members
proptest! {
    #[test]
    fn test_capability_missing_is_difference(
        offered in prop::collection::vec(capability_strategy(), 0..6),
        required in prop::collection::vec(capability_strategy(), 0..6),
    ) {
        let offered: CapabilitySet = offered.into_iter().collect();
        let required: CapabilitySet = required.into_iter().collect();

        let missing = offered.missing(&required);
        for capability in required.iter() {
            prop_assert_eq!(missing.contains(&capability), !offered.contains(capability));
        }
        prop_assert!(offered.missing(&offered).is_empty());
    }
}

// Overrides win where set; the parent value stays everywhere else
proptest! {
    #[test]
    fn test_config_overrides_precedence(
        max_retries in prop::option::of(0..10u32),
        timeout_ms in prop::option::of(1..1_000_000u64),
        enable_fallback in prop::option::of(any::<bool>()),
        preferred in prop::option::of("ollama|gemini"),
    ) {
        let parent = AgentConfig {
            preferred_provider: Some("ollama".into()),
            ..AgentConfig::default()
        };
        let overrides = ConfigOverrides {
            max_retries,
            timeout_ms,
            enable_fallback,
            preferred_provider: preferred.clone(),
            ..ConfigOverrides::default()
        };

        let child = parent.with_overrides(&overrides);

        prop_assert_eq!(child.max_retries, max_retries.unwrap_or(parent.max_retries));
        prop_assert_eq!(child.timeout_ms, timeout_ms.unwrap_or(parent.timeout_ms));
        prop_assert_eq!(child.enable_fallback, enable_fallback.unwrap_or(parent.enable_fallback));
        prop_assert_eq!(
            child.preferred_provider,
            preferred.or(parent.preferred_provider.clone())
        );
    }
}
