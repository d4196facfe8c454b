//! Lifecycle hooks around unit execution.
//!
//! A `HookSet` is assembled once by the caller and passed into each
//! `execute` call. It is immutable after construction and cheap to clone, so
//! concurrent callers of one executor never share registration state.

use crate::agent::unit::{FailureKind, WorkRequest, WorkResponse};
use std::sync::Arc;

pub type BeforeHook<I> = Arc<dyn Fn(WorkRequest<I>) -> WorkRequest<I> + Send + Sync>;
pub type AfterHook<O> = Arc<dyn Fn(WorkResponse<O>) -> WorkResponse<O> + Send + Sync>;
pub type ErrorHook<I> = Arc<dyn Fn(&WorkRequest<I>, FailureKind, &str) + Send + Sync>;

/// Before, after and on-error hooks, each run in registration order.
pub struct HookSet<I, O> {
    before: Vec<BeforeHook<I>>,
    after: Vec<AfterHook<O>>,
    on_error: Vec<ErrorHook<I>>,
}

impl<I, O> HookSet<I, O> {
    pub fn new() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
            on_error: Vec::new(),
        }
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(WorkRequest<I>) -> WorkRequest<I> + Send + Sync + 'static,
    {
        self.before.push(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(WorkResponse<O>) -> WorkResponse<O> + Send + Sync + 'static,
    {
        self.after.push(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&WorkRequest<I>, FailureKind, &str) + Send + Sync + 'static,
    {
        self.on_error.push(Arc::new(hook));
        self
    }

    /// Chain every before hook; each sees the previous hook's output.
    pub fn run_before(&self, request: WorkRequest<I>) -> WorkRequest<I> {
        self.before.iter().fold(request, |req, hook| hook(req))
    }

    /// Chain every after hook over a successful response.
    pub fn run_after(&self, response: WorkResponse<O>) -> WorkResponse<O> {
        self.after.iter().fold(response, |resp, hook| hook(resp))
    }

    pub fn run_on_error(&self, request: &WorkRequest<I>, kind: FailureKind, error: &str) {
        for hook in &self.on_error {
            hook(request, kind, error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.on_error.is_empty()
    }
}

impl<I, O> Default for HookSet<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Clone for HookSet<I, O> {
    fn clone(&self) -> Self {
        Self {
            before: self.before.clone(),
            after: self.after.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for HookSet<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("on_error", &self.on_error.len())
            .finish()
    }
}
