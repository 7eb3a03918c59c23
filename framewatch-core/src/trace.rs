// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Span correlation registry.
//!
//! `with_span` opens a child span under the caller's trace context (or a new
//! trace), keeps it in the active registry while the work runs and removes
//! it on every exit path, including early returns and panics. Captures read
//! the open spans through [`SpanTracker::active_spans`].
//!
//! The caller's context is either passed explicitly or taken from the span
//! currently open on this thread (sync) or task (async).

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

thread_local! {
    static CURRENT: RefCell<Option<TraceContext>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CURRENT: TraceContext;
}

/// Context of the innermost span open on this thread or task, if any.
pub fn current_context() -> Option<TraceContext> {
    CURRENT
        .with(|current| current.borrow().clone())
        .or_else(|| TASK_CURRENT.try_with(TraceContext::clone).ok())
}

/// Correlation handle passed to the work running inside a span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: u64,
}

/// An open span, as recorded in the registry and in diagnostic snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub name: String,
    pub start_time_ms: u64,
}

/// Registry of currently open spans.
pub struct SpanTracker {
    active: DashMap<u64, Span>,
    next_span_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl SpanTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            active: DashMap::new(),
            next_span_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Create a tracker wrapped in an Arc for sharing across threads.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Run `work` inside a span named `name`, child of `parent` if given,
    /// otherwise of the current span.
    pub fn with_span<R>(
        &self,
        parent: Option<&TraceContext>,
        name: &str,
        work: impl FnOnce(&TraceContext) -> R,
    ) -> R {
        let parent = parent.cloned().or_else(current_context);
        let guard = self.open(parent.as_ref(), name);
        let _current = CurrentGuard::enter(guard.context.clone());
        let _entered = tracing::debug_span!("span", span_name = %name, span_id = guard.context.span_id)
            .entered();
        work(&guard.context)
    }

    /// Async form of [`SpanTracker::with_span`]; the span stays registered
    /// until the future completes or is dropped.
    pub async fn with_span_async<F, Fut, R>(
        &self,
        parent: Option<&TraceContext>,
        name: &str,
        work: F,
    ) -> R
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = R>,
    {
        let parent = parent.cloned().or_else(current_context);
        let guard = self.open(parent.as_ref(), name);
        TASK_CURRENT
            .scope(guard.context.clone(), work(guard.context.clone()))
            .await
    }

    fn open(&self, parent: Option<&TraceContext>, name: &str) -> SpanGuard<'_> {
        let span_id = self.next_span_id.fetch_add(1, Ordering::Relaxed);
        let trace_id = parent
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        self.active.insert(
            span_id,
            Span {
                trace_id: trace_id.clone(),
                span_id,
                parent_span_id: parent.map(|p| p.span_id),
                name: name.to_string(),
                start_time_ms: self.clock.now_ms(),
            },
        );

        SpanGuard {
            tracker: self,
            context: TraceContext { trace_id, span_id },
        }
    }

    /// Snapshot of open spans, oldest first.
    pub fn active_spans(&self) -> Vec<Span> {
        let mut spans: Vec<Span> = self.active.iter().map(|r| r.value().clone()).collect();
        spans.sort_by_key(|s| s.span_id);
        spans
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Default for SpanTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpanTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanTracker")
            .field("active", &self.active.len())
            .finish()
    }
}

/// Removes its span from the registry when dropped.
struct SpanGuard<'a> {
    tracker: &'a SpanTracker,
    context: TraceContext,
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.tracker.active.remove(&self.context.span_id);
    }
}

/// Makes a span the thread's current context, restoring the previous one on drop.
struct CurrentGuard {
    previous: Option<TraceContext>,
}

impl CurrentGuard {
    fn enter(context: TraceContext) -> Self {
        let previous = CURRENT.with(|current| current.replace(Some(context)));
        Self { previous }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_span_registered_during_work() {
        let tracker = SpanTracker::new();
        let seen = tracker.with_span(None, "load-feed", |ctx| {
            let spans = tracker.active_spans();
            assert_eq!(spans.len(), 1);
            assert_eq!(spans[0].span_id, ctx.span_id);
            assert_eq!(spans[0].name, "load-feed");
            spans[0].parent_span_id
        });
        assert_eq!(seen, None);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_child_span_shares_trace() {
        let tracker = SpanTracker::new();
        tracker.with_span(None, "outer", |outer| {
            tracker.with_span(Some(outer), "inner", |inner| {
                assert_eq!(inner.trace_id, outer.trace_id);
                assert_ne!(inner.span_id, outer.span_id);
                let spans = tracker.active_spans();
                assert_eq!(spans.len(), 2);
                assert_eq!(spans[1].parent_span_id, Some(outer.span_id));
            });
            assert_eq!(tracker.active_count(), 1);
        });
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_nested_span_joins_current_trace() {
        let tracker = SpanTracker::new();
        assert!(current_context().is_none());

        tracker.with_span(None, "frame", |outer| {
            assert_eq!(current_context().as_ref(), Some(outer));
            tracker.with_span(None, "draw", |inner| {
                assert_eq!(inner.trace_id, outer.trace_id);
                assert_eq!(tracker.active_spans()[1].parent_span_id, Some(outer.span_id));
            });
            assert_eq!(current_context().as_ref(), Some(outer));
        });
        assert!(current_context().is_none());
    }

    #[test]
    fn test_current_context_restored_after_panic() {
        let tracker = SpanTracker::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracker.with_span(None, "explodes", |_| panic!("boom"));
        }));
        assert!(current_context().is_none());
    }

    #[test]
    fn test_span_removed_on_error_result() {
        let tracker = SpanTracker::new();
        let result: Result<(), &str> = tracker.with_span(None, "fails", |_| Err("nope"));
        assert!(result.is_err());
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_span_removed_on_panic() {
        let tracker = SpanTracker::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracker.with_span(None, "explodes", |_| panic!("boom"));
        }));
        assert!(outcome.is_err());
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_span_start_time_from_clock() {
        let clock = Arc::new(ManualClock::new(4_200));
        let tracker = SpanTracker::with_clock(clock);
        tracker.with_span(None, "timed", |_| {
            assert_eq!(tracker.active_spans()[0].start_time_ms, 4_200);
        });
    }

    #[tokio::test]
    async fn test_async_span() {
        let tracker = SpanTracker::new();
        let value = tracker
            .with_span_async(None, "fetch", |ctx| async move {
                tokio::task::yield_now().await;
                ctx.span_id
            })
            .await;
        assert!(value > 0);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_async_span_is_current_across_awaits() {
        let owned = SpanTracker::new();
        let tracker = &owned;
        tracker
            .with_span_async(None, "refresh", |outer| async move {
                tokio::task::yield_now().await;
                assert_eq!(current_context(), Some(outer.clone()));
                tracker
                    .with_span_async(None, "fetch", |inner| async move {
                        assert_eq!(inner.trace_id, outer.trace_id);
                        tracker.with_span(None, "parse", |parse| {
                            assert_eq!(parse.trace_id, inner.trace_id);
                            let spans = tracker.active_spans();
                            assert_eq!(spans[2].parent_span_id, Some(inner.span_id));
                        });
                    })
                    .await;
            })
            .await;
        assert!(current_context().is_none());
    }
}
