//! Action input and output.
//!
//! [`Output`] and [`Input`] represent the result a callable action produces
//! and the value it receives, adapted from dagrs's `task::state` module.
//! Unlike dagrs, anadama tasks integrate through tracked objects (files,
//! executables, ...) rather than by piping one action's `Output` into the
//! next action's `Input`, so the semaphore-gated `ExecState` dagrs uses for
//! that purpose has no counterpart here — the runner's per-pool semaphore
//! plays the equivalent concurrency-gating role instead.

use std::any::Any;
use std::slice::Iter;
use std::sync::Arc;

/// Container type for an action's output value.
#[derive(Debug, Clone)]
pub struct Content {
    content: Arc<dyn Any + Send + Sync>,
}

impl Content {
    pub fn new<H: Send + Sync + 'static>(val: H) -> Self {
        Self { content: Arc::new(val) }
    }

    pub fn from_arc<H: Send + Sync + 'static>(val: Arc<H>) -> Self {
        Self { content: val }
    }

    pub fn get<H: 'static>(&self) -> Option<&H> {
        self.content.downcast_ref::<H>()
    }
}

/// Result produced by a callable action.
#[derive(Clone, Debug)]
pub enum Output {
    Out(Option<Content>),
    Err(String),
}

impl Output {
    pub fn new<H: Send + Sync + 'static>(val: H) -> Self {
        Self::Out(Some(Content::new(val)))
    }

    pub fn empty() -> Self {
        Self::Out(None)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Err(msg.into())
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    pub fn get_out(&self) -> Option<Content> {
        match self {
            Self::Out(out) => out.clone(),
            Self::Err(_) => None,
        }
    }
}

/// An action's input value. Reserved for callers that build actions by
/// composing smaller units; anadama itself always invokes top-level actions
/// with an empty `Input` since task-to-task data flows through tracked
/// objects.
#[derive(Debug, Default)]
pub struct Input(Vec<Content>);

impl Input {
    pub fn new(input: Vec<Content>) -> Self {
        Self(input)
    }

    pub fn get_iter(&self) -> Iter<Content> {
        self.0.iter()
    }
}
