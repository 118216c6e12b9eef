//! # Correlation Context
//!
//! Makes a correlation identifier implicitly available to arbitrarily nested
//! code within one unit of work, without threading it through every call
//! signature. Two tiers: a run-level id stable for the whole run, and a
//! per-item id regenerated for every unit of work.
//!
//! Storage is a `tokio::task_local!`, so a value set inside one spawned unit
//! of work is never visible to a concurrently executing unit, and nested
//! scopes shadow outer ones, so `current()` returns the nearest enclosing
//! value. Scopes are dropped with the future, so nothing leaks into reused
//! worker tasks.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel returned by [`current`] when no correlation id is in scope.
pub const UNSET_CORRELATION: &str = "unknown";

tokio::task_local! {
    static CORRELATION: RefCell<Option<CorrelationId>>;
}

/// Identifier attached to log and diagnostic output to group records
/// belonging to one run or one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel value observed outside any correlation scope.
    pub fn unset() -> Self {
        Self(UNSET_CORRELATION.to_string())
    }

    pub fn is_set(&self) -> bool {
        self.0 != UNSET_CORRELATION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Run `fut` with `id` as the current correlation id for the calling task.
///
/// Nested calls shadow the outer id for their duration; sibling tasks are
/// unaffected.
pub async fn scope<F>(id: CorrelationId, fut: F) -> F::Output
where
    F: Future,
{
    CORRELATION.scope(RefCell::new(Some(id)), fut).await
}

/// Nearest enclosing correlation id, or the `unknown` sentinel when none is
/// in scope.
pub fn current() -> CorrelationId {
    CORRELATION
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
        .unwrap_or_else(CorrelationId::unset)
}

/// Replace the correlation id within the innermost enclosing scope.
///
/// Outside any scope there is no slot to write into; the value is dropped
/// and a diagnostic is emitted so the lost id is at least traceable.
pub fn set_current(id: CorrelationId) {
    let outcome = CORRELATION.try_with(|cell| *cell.borrow_mut() = Some(id.clone()));
    if outcome.is_err() {
        tracing::debug!(
            correlation_id = %id,
            "set_current called outside a correlation scope; value dropped"
        );
    }
}

/// Clear the correlation id within the innermost enclosing scope, so
/// subsequent [`current`] calls see the sentinel.
pub fn clear_current() {
    let _ = CORRELATION.try_with(|cell| *cell.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sentinel_outside_scope() {
        assert_eq!(current().as_str(), UNSET_CORRELATION);
        assert!(!current().is_set());
    }

    #[tokio::test]
    async fn test_scope_establishes_and_drops_id() {
        let id = CorrelationId::new("item-1");
        scope(id.clone(), async {
            assert_eq!(current(), id);
        })
        .await;
        assert_eq!(current().as_str(), UNSET_CORRELATION);
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_outer() {
        let run_id = CorrelationId::new("run-level");
        let item_id = CorrelationId::new("item-level");

        scope(run_id.clone(), async {
            assert_eq!(current(), run_id);
            scope(item_id.clone(), async {
                assert_eq!(current(), item_id);
            })
            .await;
            // Back to the run-level id once the item scope ends
            assert_eq!(current(), run_id);
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_and_clear_within_scope() {
        scope(CorrelationId::new("original"), async {
            set_current(CorrelationId::new("replaced"));
            assert_eq!(current().as_str(), "replaced");
            clear_current();
            assert_eq!(current().as_str(), UNSET_CORRELATION);
        })
        .await;
    }

    struct CapturedEvents {
        events: std::sync::Arc<std::sync::Mutex<Vec<(tracing::Level, String)>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CapturedEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct MessageVisitor(String);
            impl tracing::field::Visit for MessageVisitor {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.0 = format!("{value:?}");
                    }
                }
            }

            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.events
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    #[tokio::test]
    async fn test_set_outside_scope_drops_value_with_diagnostic() {
        use tracing_subscriber::layer::SubscriberExt;

        let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(CapturedEvents {
            events: std::sync::Arc::clone(&events),
        });
        let _guard = tracing::subscriber::set_default(subscriber);

        set_current(CorrelationId::new("lost"));
        assert_eq!(current().as_str(), UNSET_CORRELATION);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|(level, message)| {
            *level == tracing::Level::DEBUG && message.contains("outside a correlation scope")
        }));
    }

    #[tokio::test]
    async fn test_concurrent_tasks_do_not_share_ids() {
        let first = tokio::spawn(scope(CorrelationId::new("task-a"), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            current()
        }));
        let second = tokio::spawn(scope(CorrelationId::new("task-b"), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            current()
        }));

        assert_eq!(first.await.unwrap().as_str(), "task-a");
        assert_eq!(second.await.unwrap().as_str(), "task-b");
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        assert_ne!(CorrelationId::generate(), CorrelationId::generate());
    }
}
