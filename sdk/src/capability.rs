//! Provider capabilities
//!
//! Providers advertise what they can do through a [`CapabilitySet`]; agents
//! declare what they need. Mismatches are reported, never enforced.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single capability a provider may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Plain text generation
    TextGeneration,

    /// Generation grounded on live web search results
    WebSearch,

    /// JSON output conforming to a requested shape
    StructuredOutput,

    /// Incremental streaming of tokens
    Streaming,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::TextGeneration,
        Capability::WebSearch,
        Capability::StructuredOutput,
        Capability::Streaming,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::TextGeneration => write!(f, "text_generation"),
            Capability::WebSearch => write!(f, "web_search"),
            Capability::StructuredOutput => write!(f, "structured_output"),
            Capability::Streaming => write!(f, "streaming"),
        }
    }
}

/// Ordered set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn supports_search(&self) -> bool {
        self.contains(Capability::WebSearch)
    }

    pub fn supports_structured(&self) -> bool {
        self.contains(Capability::StructuredOutput)
    }

    /// Capabilities in `required` that this set lacks
    pub fn missing(&self, required: &CapabilitySet) -> Vec<Capability> {
        required.0.difference(&self.0).copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_capabilities() {
        let offered = CapabilitySet::new()
            .with(Capability::TextGeneration)
            .with(Capability::StructuredOutput);
        let required: CapabilitySet = [Capability::WebSearch, Capability::TextGeneration]
            .into_iter()
            .collect();

        assert_eq!(offered.missing(&required), vec![Capability::WebSearch]);
        assert!(offered.supports_structured());
        assert!(!offered.supports_search());
    }

    #[test]
    fn test_display() {
        let set = CapabilitySet::new()
            .with(Capability::WebSearch)
            .with(Capability::TextGeneration);
        assert_eq!(set.to_string(), "[text_generation, web_search]");
    }

    #[test]
    fn test_serializes_as_list() {
        let set = CapabilitySet::new().with(Capability::Streaming);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["streaming"]"#);
    }
}
