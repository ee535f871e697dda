//! Cancellable execution context passed to every store and diff call.
//!
//! A `Context` forms a tree: children observe their parent's cancellation and
//! deadline, and carry values (the namespace) down. Cancellation is
//! cooperative: services call [`Context::check`] before doing work and between
//! units of work.
//!
//! [`Context::detached`] produces a child that keeps the parent's values but
//! reports neither cancellation nor deadline from it. Cleanup paths use it so
//! that resources opened by a failed or abandoned operation are still freed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct Context {
    node: Arc<Node>,
}

#[derive(Debug)]
struct Node {
    parent: Option<Context>,
    /// Parent is consulted for values only, never for cancellation.
    detached: bool,
    canceled: AtomicBool,
    deadline: Option<Instant>,
    namespace: Option<String>,
}

impl Context {
    /// Root context: never canceled unless [`cancel`](Self::cancel) is called
    /// on it, no deadline, default namespace.
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node {
                parent: None,
                detached: false,
                canceled: AtomicBool::new(false),
                deadline: None,
                namespace: None,
            }),
        }
    }

    fn child(&self, detached: bool, deadline: Option<Instant>, namespace: Option<String>) -> Self {
        Self {
            node: Arc::new(Node {
                parent: Some(self.clone()),
                detached,
                canceled: AtomicBool::new(false),
                deadline,
                namespace,
            }),
        }
    }

    /// Child context that can be canceled independently of its parent.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        self.child(false, None, None)
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.child(false, Some(deadline), None)
    }

    #[must_use]
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        self.child(false, None, Some(namespace.into()))
    }

    /// Child that inherits values but ignores the parent's cancellation,
    /// deadline, and error state.
    #[must_use]
    pub fn detached(&self) -> Self {
        self.child(true, None, None)
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.node.canceled.store(true, Ordering::SeqCst);
    }

    pub fn namespace(&self) -> &str {
        match (&self.node.namespace, &self.node.parent) {
            (Some(ns), _) => ns.as_str(),
            (None, Some(parent)) => parent.namespace(),
            (None, None) => DEFAULT_NAMESPACE,
        }
    }

    /// Earliest deadline visible from this context.
    pub fn deadline(&self) -> Option<Instant> {
        let inherited = match &self.node.parent {
            Some(parent) if !self.node.detached => parent.deadline(),
            _ => None,
        };
        match (self.node.deadline, inherited) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        }
    }

    pub fn err(&self) -> Option<ContextError> {
        if self.node.canceled.load(Ordering::SeqCst) {
            return Some(ContextError::Canceled);
        }
        if self
            .node
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Some(ContextError::DeadlineExceeded);
        }
        match &self.node.parent {
            Some(parent) if !self.node.detached => parent.err(),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// `Err` once the context is canceled or past its deadline.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert_eq!(ctx.namespace(), DEFAULT_NAMESPACE);
    }

    #[test]
    fn cancel_propagates_to_children() {
        let parent = Context::background().with_cancel();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(child.check(), Err(ContextError::Canceled));
    }

    #[test]
    fn cancel_does_not_propagate_upwards() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn expired_deadline_reports_deadline_exceeded() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn child_deadline_is_earliest() {
        let far = Context::background().with_timeout(Duration::from_secs(600));
        let near = far.with_timeout(Duration::from_secs(1));
        assert!(near.deadline().unwrap() < far.deadline().unwrap());
        // A later child deadline does not extend the parent's.
        let later = near.with_timeout(Duration::from_secs(900));
        assert_eq!(later.deadline(), near.deadline());
    }

    #[test]
    fn detached_ignores_parent_cancellation() {
        let parent = Context::background().with_cancel();
        parent.cancel();
        let detached = parent.detached();
        assert!(detached.err().is_none());
        assert!(detached.check().is_ok());
    }

    #[test]
    fn detached_ignores_parent_deadline() {
        let parent = Context::background().with_deadline(Instant::now());
        let detached = parent.detached();
        assert!(detached.deadline().is_none());
        assert!(detached.err().is_none());
    }

    #[test]
    fn detached_keeps_namespace() {
        let ctx = Context::background().with_namespace("builds").with_cancel();
        ctx.cancel();
        assert_eq!(ctx.detached().namespace(), "builds");
    }

    #[test]
    fn detached_child_can_carry_own_timeout() {
        let parent = Context::background().with_cancel();
        parent.cancel();
        let bounded = parent.detached().with_timeout(Duration::from_secs(10));
        assert!(bounded.err().is_none());
        let remaining = bounded.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(10));
    }

    #[test]
    fn detached_context_can_still_be_canceled_itself() {
        let detached = Context::background().detached();
        detached.cancel();
        assert_eq!(detached.err(), Some(ContextError::Canceled));
    }

    #[test]
    fn context_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Context>();
    }
}
