//! Per-cycle reasoning session: call budget and cache counters.
//!
//! A session is owned by exactly one cycle run, mutated only by the runtime,
//! and dropped at cycle end. It is never persisted; its counters end up in
//! the decision log via call metadata.

use serde::{Deserialize, Serialize};

/// Hard limits for one cycle's worth of provider calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReasoningBudget {
    pub max_calls: u32,
    pub max_prompt_chars: usize,
}

impl Default for ReasoningBudget {
    fn default() -> Self {
        Self {
            max_calls: 8,
            max_prompt_chars: 140_000,
        }
    }
}

/// Budget and cache bookkeeping for one orchestration run.
#[derive(Debug, Clone)]
pub struct ReasoningSession {
    pub trace_id: String,
    pub model_name: String,
    pub provider: String,
    pub budget: ReasoningBudget,
    pub call_count: u32,
    pub cache_hits: u32,
}

impl ReasoningSession {
    pub fn new(
        trace_id: impl Into<String>,
        model_name: impl Into<String>,
        provider: impl Into<String>,
        budget: ReasoningBudget,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            model_name: model_name.into(),
            provider: provider.into(),
            budget,
            call_count: 0,
            cache_hits: 0,
        }
    }

    /// True once the provider call budget is spent. Further calls must use
    /// the deterministic fallback, never the provider.
    pub fn budget_exhausted(&self) -> bool {
        self.call_count >= self.budget.max_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let mut session = ReasoningSession::new(
            "trace-1",
            "qwen3:8b",
            "ollama",
            ReasoningBudget {
                max_calls: 2,
                max_prompt_chars: 1000,
            },
        );
        assert!(!session.budget_exhausted());
        session.call_count = 2;
        assert!(session.budget_exhausted());
    }
}
