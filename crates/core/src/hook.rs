//! Lifecycle hooks — observation points around the turn state machine.
//!
//! Hooks fire at turn start, after each tool result, and at turn end. They
//! run in registration order, each bounded by a per-hook timeout, and they
//! can never alter the turn's outcome: failures, panics, and overruns are
//! logged and swallowed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::decision::Decision;
use crate::provider::ToolScores;
use crate::tool::ToolResult;

/// The lifecycle events hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    TurnStart,
    ToolResult,
    TurnEnd,
}

/// Read-only snapshot of the turn handed to each hook. Hooks may not
/// mutate it; they receive a shared reference behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub session_id: String,
    pub turn_index: usize,
    pub user_message: String,
    pub scores: Option<ToolScores>,
    pub decision: Option<Decision>,
    pub tool_result: Option<ToolResult>,
    pub response: Option<String>,
}

type BoxedHookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type HookFn = Arc<dyn Fn(Arc<HookContext>) -> BoxedHookFuture + Send + Sync>;

const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 2;

struct RegisteredHook {
    event: HookEvent,
    name: String,
    f: HookFn,
}

/// Ordered hook dispatch. Append-only after startup; iteration during a
/// turn is therefore safe without locking.
pub struct HookRegistry {
    hooks: Vec<RegisteredHook>,
    per_hook_timeout: Duration,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            per_hook_timeout: Duration::from_secs(DEFAULT_HOOK_TIMEOUT_SECS),
        }
    }

    pub fn with_per_hook_timeout(mut self, timeout: Duration) -> Self {
        self.per_hook_timeout = timeout;
        self
    }

    /// Register a hook for an event. Hooks fire in registration order.
    pub fn register<F, Fut>(&mut self, event: HookEvent, name: impl Into<String>, f: F)
    where
        F: Fn(Arc<HookContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f: HookFn = Arc::new(move |ctx| Box::pin(f(ctx)));
        self.hooks.push(RegisteredHook {
            event,
            name: name.into(),
            f,
        });
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire every hook registered for `event`, in order. Each hook runs on
    /// its own task so a panic cannot unwind into the turn, and is bounded
    /// by the per-hook timeout.
    pub async fn fire(&self, event: HookEvent, ctx: Arc<HookContext>) {
        for hook in self.hooks.iter().filter(|h| h.event == event) {
            let future = (hook.f)(ctx.clone());
            let handle = tokio::spawn(future);
            match tokio::time::timeout(self.per_hook_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!(hook = %hook.name, error = %join_err, "Hook panicked");
                }
                Err(_) => {
                    warn!(
                        hook = %hook.name,
                        timeout_secs = self.per_hook_timeout.as_secs(),
                        "Hook timed out"
                    );
                }
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Arc<HookContext> {
        Arc::new(HookContext {
            session_id: "cli:local".into(),
            turn_index: 1,
            user_message: "hello".into(),
            ..HookContext::default()
        })
    }

    #[tokio::test]
    async fn hooks_fire_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();

        for i in 0..3 {
            let order = order.clone();
            registry.register(HookEvent::TurnStart, format!("hook{i}"), move |_ctx| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(i);
                }
            });
        }

        registry.fire(HookEvent::TurnStart, ctx()).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn hooks_only_fire_for_their_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        let c = count.clone();
        registry.register(HookEvent::TurnEnd, "end-only", move |_ctx| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.fire(HookEvent::TurnStart, ctx()).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        registry.fire(HookEvent::TurnEnd, ctx()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_hook_does_not_abort_dispatch() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();

        registry.register(HookEvent::TurnStart, "bad", |_ctx| async {
            panic!("hook gone wrong");
        });
        let c = count.clone();
        registry.register(HookEvent::TurnStart, "good", move |_ctx| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.fire(HookEvent::TurnStart, ctx()).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "later hooks still run");
    }

    #[tokio::test]
    async fn slow_hook_is_cut_off() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry =
            HookRegistry::new().with_per_hook_timeout(Duration::from_millis(50));

        registry.register(HookEvent::TurnStart, "slow", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let c = count.clone();
        registry.register(HookEvent::TurnStart, "after", move |_ctx| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let start = std::time::Instant::now();
        registry.fire(HookEvent::TurnStart, ctx()).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
