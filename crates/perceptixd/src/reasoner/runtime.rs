//! Reasoning runtime: budget enforcement, response cache, fallback protocol.
//!
//! Every provider interaction in the system goes through [`LlmRuntime::generate`].
//! The contract, in order:
//!
//! 1. Empty or oversized prompts are errors, never silently truncated.
//! 2. Cache hit (same model, stage, prompt) returns the stored payload with
//!    zero latency; it increments the session's cache-hit counter and does
//!    not consume budget.
//! 3. An exhausted call budget routes to the deterministic fallback instead
//!    of the provider.
//! 4. Provider failure or a malformed (non-JSON) reply also routes to the
//!    fallback. The cycle degrades, it does not abort.
//!
//! Each call produces a [`CallMeta`] that the caller appends verbatim to the
//! decision log.

use crate::reasoner::client::LlmClient;
use crate::reasoner::session::ReasoningSession;
use chrono::{DateTime, Utc};
use lru::LruCache;
use perceptix_common::PerceptixError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

/// Audit metadata for one reasoning call.
#[derive(Debug, Clone, Serialize)]
pub struct CallMeta {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub stage: String,
    pub provider: String,
    pub model_name: String,
    /// False when the payload came from the cache or the fallback.
    pub api_used: bool,
    pub cache_hit: bool,
    pub budget_exhausted: bool,
    pub prompt_hash: String,
    pub latency_ms: f64,
}

impl CallMeta {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Shared reasoning runtime. One instance per daemon; sessions are per-cycle.
pub struct LlmRuntime {
    client: Option<LlmClient>,
    cache: Mutex<LruCache<String, Value>>,
}

impl LlmRuntime {
    pub fn new(client: Option<LlmClient>, cache_max_entries: usize) -> Self {
        let capacity =
            NonZeroUsize::new(cache_max_entries).unwrap_or(NonZeroUsize::new(2048).unwrap());
        Self {
            client,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True when a live provider client is attached.
    pub fn has_provider(&self) -> bool {
        self.client.is_some()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Run one reasoning call for `stage`.
    ///
    /// `fallback` builds the deterministic payload used when the provider is
    /// unavailable, failing, over budget, or returning garbage.
    pub async fn generate<F>(
        &self,
        session: &mut ReasoningSession,
        stage: &str,
        prompt: &str,
        fallback: F,
    ) -> Result<(Value, CallMeta), PerceptixError>
    where
        F: FnOnce() -> Value,
    {
        if prompt.trim().is_empty() {
            return Err(PerceptixError::Budget(format!(
                "empty prompt for stage '{}'",
                stage
            )));
        }
        if prompt.len() > session.budget.max_prompt_chars {
            return Err(PerceptixError::Budget(format!(
                "prompt for stage '{}' is {} chars, limit {}",
                stage,
                prompt.len(),
                session.budget.max_prompt_chars
            )));
        }

        let prompt_hash = cache_key(&session.model_name, stage, prompt);

        // Cache hit: free, instant, budget untouched.
        if let Some(cached) = self.cache_get(&prompt_hash) {
            session.cache_hits += 1;
            debug!(stage, hash = %&prompt_hash[..12], "Reasoning cache hit");
            let meta = self.meta(session, stage, &prompt_hash, false, true, false, 0.0);
            return Ok((cached, meta));
        }

        // Budget spent: deterministic fallback, never the provider.
        if session.budget_exhausted() {
            warn!(
                stage,
                call_count = session.call_count,
                "Reasoning budget exhausted; using deterministic fallback"
            );
            let payload = fallback();
            self.cache_put(prompt_hash.clone(), payload.clone());
            let meta = self.meta(session, stage, &prompt_hash, false, false, true, 0.0);
            return Ok((payload, meta));
        }

        session.call_count += 1;
        let started = Instant::now();

        let (payload, api_used) = match &self.client {
            Some(client) => match client.generate_json(prompt).await {
                Ok(value) => (value, true),
                Err(e) => {
                    warn!(stage, "Provider call failed ({}); using fallback", e);
                    (fallback(), false)
                }
            },
            None => {
                debug!(stage, "No provider configured; using fallback");
                (fallback(), false)
            }
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.cache_put(prompt_hash.clone(), payload.clone());
        let meta = self.meta(session, stage, &prompt_hash, api_used, false, false, latency_ms);
        Ok((payload, meta))
    }

    fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn cache_put(&self, key: String, value: Value) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, value);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn meta(
        &self,
        session: &ReasoningSession,
        stage: &str,
        prompt_hash: &str,
        api_used: bool,
        cache_hit: bool,
        budget_exhausted: bool,
        latency_ms: f64,
    ) -> CallMeta {
        CallMeta {
            timestamp: Utc::now(),
            trace_id: session.trace_id.clone(),
            stage: stage.to_string(),
            provider: session.provider.clone(),
            model_name: session.model_name.clone(),
            api_used,
            cache_hit,
            budget_exhausted,
            prompt_hash: prompt_hash.to_string(),
            latency_ms,
        }
    }
}

/// Cache key: sha256 over model, stage and prompt, newline separated.
fn cache_key(model: &str, stage: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(stage.as_bytes());
    hasher.update(b"\n");
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::session::ReasoningBudget;
    use serde_json::json;

    fn session() -> ReasoningSession {
        ReasoningSession::new("trace-1", "qwen3:8b", "ollama", ReasoningBudget::default())
    }

    fn runtime() -> LlmRuntime {
        // No client: every miss resolves through the fallback.
        LlmRuntime::new(None, 64)
    }

    #[tokio::test]
    async fn test_identical_call_hits_cache() {
        let rt = runtime();
        let mut s = session();

        let (first, meta1) = rt
            .generate(&mut s, "reason", "analyze this", || json!({"n": 1}))
            .await
            .unwrap();
        assert!(!meta1.cache_hit);
        assert_eq!(s.call_count, 1);
        assert_eq!(s.cache_hits, 0);

        let (second, meta2) = rt
            .generate(&mut s, "reason", "analyze this", || json!({"n": 2}))
            .await
            .unwrap();
        assert!(meta2.cache_hit);
        assert!(!meta2.api_used);
        assert_eq!(meta2.latency_ms, 0.0);
        // Cached payload returned; the second fallback never ran.
        assert_eq!(first, second);
        assert_eq!(s.call_count, 1);
        assert_eq!(s.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_stage_is_part_of_cache_key() {
        let rt = runtime();
        let mut s = session();

        rt.generate(&mut s, "reason", "same prompt", || json!({"stage": "reason"}))
            .await
            .unwrap();
        let (v, meta) = rt
            .generate(&mut s, "verify", "same prompt", || json!({"stage": "verify"}))
            .await
            .unwrap();
        assert!(!meta.cache_hit);
        assert_eq!(v, json!({"stage": "verify"}));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_routes_to_fallback() {
        let rt = runtime();
        let mut s = ReasoningSession::new(
            "trace-1",
            "qwen3:8b",
            "ollama",
            ReasoningBudget {
                max_calls: 1,
                max_prompt_chars: 1000,
            },
        );

        rt.generate(&mut s, "reason", "prompt one", || json!({}))
            .await
            .unwrap();
        assert_eq!(s.call_count, 1);

        let (_, meta) = rt
            .generate(&mut s, "reason", "prompt two", || json!({"fb": true}))
            .await
            .unwrap();
        assert!(meta.budget_exhausted);
        assert!(!meta.api_used);
        // Fallback calls do not consume budget.
        assert_eq!(s.call_count, 1);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_fatal() {
        let rt = runtime();
        let mut s = session();
        let err = rt
            .generate(&mut s, "reason", "   ", || json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PerceptixError::Budget(_)));
    }

    #[tokio::test]
    async fn test_oversized_prompt_is_fatal() {
        let rt = runtime();
        let mut s = ReasoningSession::new(
            "trace-1",
            "qwen3:8b",
            "ollama",
            ReasoningBudget {
                max_calls: 8,
                max_prompt_chars: 16,
            },
        );
        let err = rt
            .generate(&mut s, "reason", "a prompt well over sixteen chars", || {
                json!({})
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PerceptixError::Budget(_)));
        assert_eq!(s.call_count, 0);
    }

    #[test]
    fn test_cache_key_is_model_scoped() {
        let a = cache_key("qwen3:8b", "reason", "p");
        let b = cache_key("qwen3:4b", "reason", "p");
        assert_ne!(a, b);
    }
}
