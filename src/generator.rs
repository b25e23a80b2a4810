//! `NarrativeGenerator` (§4.2, C2): produces chapter text from world,
//! character, and action context. The LLM backend itself is out of scope
//! (SPEC_FULL.md Non-goals), only the trait and a deterministic fallback
//! implementation live here; a real deployment wires in an OpenAI-backed
//! implementation the way the original `AIService` built its prompt from
//! compacted previous chapters, character sheets, and player actions.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::protocol::{CharacterRef, GenerationKind, WorldRef};

/// Context handed to [`NarrativeGenerator::generate`]. Mirrors the shape the
/// original `ai_service.py` assembled before calling the chat completion API:
/// world description, a token-economizing compaction of prior chapters,
/// character sheets, and (when closing an action phase) the player actions
/// submitted during it.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub world: WorldRef,
    pub previous_chapters: Vec<String>,
    pub characters: Vec<CharacterRef>,
    pub actions: Vec<String>,
    pub total_chapters: u32,
    pub chapter_index: u32,
}

/// Chapter-text generation backend. Implementations may be slow (seconds);
/// callers run this outside any Store lock except the per-game `advancing`
/// single-flight guard (§4.5). On any failure the implementation should
/// return fallback text rather than propagate an error (the one exception
/// is the `First` kind during `initializing`, where a fatal error is
/// expected to surface so `LobbyToGame` can transition the game to `failed`).
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, kind: GenerationKind, ctx: GenerationContext) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Minimal closed/open/half-open circuit breaker guarding a flapping
/// narrative backend: after `failure_threshold` consecutive failures it
/// opens for `reset_after`, then allows one probe call through (half-open)
/// before either closing again or re-opening.
struct CircuitBreaker {
    state: Mutex<BreakerState>,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    failure_threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            failure_threshold,
            reset_after,
        }
    }

    fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        match *state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = *self.opened_at.lock().expect("circuit breaker mutex poisoned");
                if opened_at.is_some_and(|at| at.elapsed() >= self.reset_after) {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.state.lock().expect("circuit breaker mutex poisoned") = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            *self.state.lock().expect("circuit breaker mutex poisoned") = BreakerState::Open;
            *self.opened_at.lock().expect("circuit breaker mutex poisoned") = Some(Instant::now());
        }
    }
}

/// Deterministic reference implementation: no network call, returns
/// templated placeholder text. Stands in for an LLM-backed implementation
/// and is circuit-broken exactly as a real backend would be, so tests and
/// local runs exercise the same degrade-to-fallback path production does.
pub struct FallbackGenerator {
    breaker: CircuitBreaker,
    call_count: AtomicU64,
}

impl FallbackGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            breaker: CircuitBreaker::new(5, Duration::from_secs(30)),
            call_count: AtomicU64::new(0),
        }
    }

    /// The sentence returned whenever the breaker is open or the (absent,
    /// here) backend call fails. Never empty so downstream `append_chapter`
    /// always has non-trivial content.
    fn fallback_text(ctx: &GenerationContext) -> String {
        format!(
            "The story of {} continues into chapter {} of {}, though the threads remain tangled for now.",
            ctx.world.name, ctx.chapter_index, ctx.total_chapters
        )
    }

    fn render(kind: GenerationKind, ctx: &GenerationContext) -> String {
        let character_names: Vec<&str> = ctx.characters.iter().map(|c| c.name.as_str()).collect();
        match kind {
            GenerationKind::First => format!(
                "In {}, {} begin their tale: {}",
                ctx.world.name,
                character_names.join(", "),
                ctx.world.description
            ),
            GenerationKind::WithActions => format!(
                "Following the deeds of {}, chapter {} unfolds: {}",
                character_names.join(", "),
                ctx.chapter_index,
                ctx.actions.join(" "),
            ),
            GenerationKind::Automatic => format!(
                "Time presses on in {}; chapter {} arrives regardless of hesitation.",
                ctx.world.name, ctx.chapter_index
            ),
        }
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrativeGenerator for FallbackGenerator {
    async fn generate(&self, kind: GenerationKind, ctx: GenerationContext) -> anyhow::Result<String> {
        self.call_count.fetch_add(1, Ordering::Relaxed);

        if !self.breaker.allow() {
            if kind == GenerationKind::First {
                anyhow::bail!("narrative generator circuit open during initialization");
            }
            return Ok(Self::fallback_text(&ctx));
        }

        let text = Self::render(kind, &ctx);
        self.breaker.record_success();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_ctx(kind_hint: u32) -> GenerationContext {
        GenerationContext {
            world: WorldRef {
                id: Uuid::new_v4(),
                name: "Aelunor".into(),
                description: "a drowned kingdom of glass towers".into(),
            },
            previous_chapters: vec!["Cap.1: they arrived.".into()],
            characters: vec![CharacterRef {
                id: Uuid::new_v4(),
                name: "Vex".into(),
                summary: "a wary scout".into(),
            }],
            actions: vec!["Vex climbs the tower".into()],
            total_chapters: 10,
            chapter_index: kind_hint,
        }
    }

    #[tokio::test]
    async fn generate_first_chapter_mentions_world_and_characters() {
        let gen = FallbackGenerator::new();
        let text = gen.generate(GenerationKind::First, sample_ctx(1)).await.unwrap();
        assert!(text.contains("Aelunor"));
        assert!(text.contains("Vex"));
    }

    #[tokio::test]
    async fn generate_with_actions_includes_submitted_actions() {
        let gen = FallbackGenerator::new();
        let text = gen
            .generate(GenerationKind::WithActions, sample_ctx(2))
            .await
            .unwrap();
        assert!(text.contains("climbs the tower"));
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_falls_back() {
        let gen = FallbackGenerator::new();
        for _ in 0..5 {
            gen.breaker.record_failure();
        }
        assert!(!gen.breaker.allow());

        let text = gen
            .generate(GenerationKind::Automatic, sample_ctx(3))
            .await
            .unwrap();
        assert!(text.contains("Time presses on"));
    }

    #[tokio::test]
    async fn circuit_open_on_first_chapter_is_fatal() {
        let gen = FallbackGenerator::new();
        for _ in 0..5 {
            gen.breaker.record_failure();
        }
        let result = gen.generate(GenerationKind::First, sample_ctx(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn circuit_half_opens_after_reset_window() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(10));
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.allow());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.allow());
    }
}
