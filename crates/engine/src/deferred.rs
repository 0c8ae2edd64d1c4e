//! Deferred values — outputs that only exist after a resource is applied.
//!
//! A [`Deferred`] is a clonable handle to a value that settles exactly once,
//! either resolved with a JSON value or rejected with a [`NodeFailure`].
//! Declarations compose deferred values with [`Deferred::map`] and
//! [`Deferred::combine`] without blocking; the executor settles them as
//! apply calls complete.
//!
//! Every deferred carries *provenance*: the set of logical resource names
//! whose outputs it derives from. The graph builder reads provenance to
//! discover dependency edges, so combinators must union it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{EngineError, NodeFailure};

/// The settled form of a deferred value.
pub type Settled = Result<Value, NodeFailure>;

type Callback = Box<dyn FnOnce(&Settled) + Send>;

struct Inner {
    /// `None` while pending; settles exactly once.
    state: Option<Settled>,
    /// Continuations to invoke on settlement, in registration order.
    callbacks: Vec<Callback>,
}

/// A value resolved asynchronously, supporting composition before resolution.
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Mutex<Inner>>,
    sources: Arc<BTreeSet<String>>,
}

impl Deferred {
    /// A deferred that is already resolved.
    pub fn resolved(value: Value) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: Some(Ok(value)),
                callbacks: Vec::new(),
            })),
            sources: Arc::new(BTreeSet::new()),
        }
    }

    /// A pending deferred with no provenance.
    pub fn pending() -> Self {
        Self::pending_with_sources(Arc::new(BTreeSet::new()))
    }

    /// A pending deferred produced by the named resource's apply call.
    pub(crate) fn produced_by(name: &str) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(name.to_string());
        Self::pending_with_sources(Arc::new(sources))
    }

    fn pending_with_sources(sources: Arc<BTreeSet<String>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: None,
                callbacks: Vec::new(),
            })),
            sources,
        }
    }

    /// Logical names of the resources this value derives from.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    /// Transition `Pending -> Resolved`, invoking all continuations.
    ///
    /// # Errors
    /// [`EngineError::AlreadyResolved`] if this value has already settled.
    pub fn resolve(&self, value: Value) -> Result<(), EngineError> {
        self.settle(Ok(value))
    }

    /// Transition `Pending -> Failed`, invoking all continuations.
    ///
    /// # Errors
    /// [`EngineError::AlreadyResolved`] if this value has already settled.
    pub fn reject(&self, failure: NodeFailure) -> Result<(), EngineError> {
        self.settle(Err(failure))
    }

    fn settle(&self, result: Settled) -> Result<(), EngineError> {
        let callbacks = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_some() {
                return Err(EngineError::AlreadyResolved);
            }
            inner.state = Some(result.clone());
            std::mem::take(&mut inner.callbacks)
        };
        // Invoke outside the lock: a continuation may settle another deferred
        // (or register on this one) without deadlocking.
        for callback in callbacks {
            callback(&result);
        }
        Ok(())
    }

    /// Register a continuation, invoked exactly once when this value settles.
    ///
    /// If the value has already settled, the continuation runs immediately on
    /// the calling thread.
    pub fn on_settle<F>(&self, f: F)
    where
        F: FnOnce(&Settled) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        match &inner.state {
            None => inner.callbacks.push(Box::new(f)),
            Some(result) => {
                let result = result.clone();
                drop(inner);
                f(&result);
            }
        }
    }

    /// Non-blocking peek at the settled result, if any.
    pub fn try_result(&self) -> Option<Settled> {
        self.inner.lock().unwrap().state.clone()
    }

    /// Whether this value has settled (resolved or failed).
    pub fn is_settled(&self) -> bool {
        self.inner.lock().unwrap().state.is_some()
    }

    /// Await settlement.
    ///
    /// Suspends until the value resolves or fails; returns immediately if it
    /// has already settled.
    pub async fn wait(&self) -> Settled {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |result| {
            let _ = tx.send(result.clone());
        });
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(NodeFailure::Internal(
                "deferred value dropped before settling".into(),
            )),
        }
    }

    /// A new deferred resolving to `f(value)` once this one resolves.
    ///
    /// Failure propagates unchanged; provenance is inherited.
    pub fn map<F>(&self, f: F) -> Deferred
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        let out = Deferred::pending_with_sources(Arc::clone(&self.sources));
        let target = out.clone();
        self.on_settle(move |result| {
            let _ = match result {
                Ok(value) => target.resolve(f(value.clone())),
                Err(failure) => target.reject(failure.clone()),
            };
        });
        out
    }

    /// A new deferred resolving to `f(values)` once *all* inputs resolve.
    ///
    /// Rejects with the first failure observed; remaining inputs are not
    /// awaited. Provenance is the union of the inputs' provenance. An empty
    /// input slice resolves immediately with `f(vec![])`.
    pub fn combine<F>(inputs: &[Deferred], f: F) -> Deferred
    where
        F: FnOnce(Vec<Value>) -> Value + Send + 'static,
    {
        let sources: BTreeSet<String> = inputs
            .iter()
            .flat_map(|d| d.sources().iter().cloned())
            .collect();
        let out = Deferred::pending_with_sources(Arc::new(sources));

        if inputs.is_empty() {
            let _ = out.resolve(f(Vec::new()));
            return out;
        }

        enum Step<F> {
            Resolve(F, Vec<Value>),
            Reject(NodeFailure),
            Wait,
        }

        struct Gather<F> {
            slots: Vec<Option<Value>>,
            remaining: usize,
            f: Option<F>,
        }

        let gather = Arc::new(Mutex::new(Gather {
            slots: vec![None; inputs.len()],
            remaining: inputs.len(),
            f: Some(f),
        }));

        for (i, input) in inputs.iter().enumerate() {
            let gather = Arc::clone(&gather);
            let target = out.clone();
            input.on_settle(move |result| {
                let step = {
                    let mut g = gather.lock().unwrap();
                    if g.f.is_none() {
                        // A failure already won, or all inputs resolved.
                        return;
                    }
                    match result {
                        Ok(value) => {
                            g.slots[i] = Some(value.clone());
                            g.remaining -= 1;
                            if g.remaining == 0 {
                                let f = g.f.take();
                                let values =
                                    g.slots.iter_mut().map(|s| s.take().unwrap_or_default()).collect();
                                match f {
                                    Some(f) => Step::Resolve(f, values),
                                    None => Step::Wait,
                                }
                            } else {
                                Step::Wait
                            }
                        }
                        Err(failure) => {
                            g.f = None;
                            Step::Reject(failure.clone())
                        }
                    }
                };
                match step {
                    Step::Resolve(f, values) => {
                        let _ = target.resolve(f(values));
                    }
                    Step::Reject(failure) => {
                        let _ = target.reject(failure);
                    }
                    Step::Wait => {}
                }
            });
        }

        out
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.lock().unwrap().state {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Deferred")
            .field("state", &state)
            .field("sources", &self.sources)
            .finish()
    }
}
