// Insteon Engine - Device-side Insteon protocol engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Multi-step choreographies
//!
//! A sequence drives a device through several request/response round trips
//! without blocking: each step queues a request, registers a trigger for the
//! awaited response and returns. The [`Sequence`] handle carries the
//! caller's callbacks and is completed exactly once, whichever path (trigger,
//! request failure, tag cancellation) gets there first.
//!
//! - [`scan`]: ALDB scans, byte-peek (generation 1) and extended (generation 2)
//! - [`write`]: write one ALDB record
//! - [`link`]: link the modem and the device
//! - [`delta`]: refresh the ALDB delta
//! - [`status`]: status request with stale-ALDB detection

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::device::{Continuation, DeviceCtx};

pub mod delta;
pub mod link;
pub mod scan;
pub mod status;
pub mod write;

/// Sequence life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceState {
    /// Running
    Started,
    /// Completed successfully
    Succeeded,
    /// Completed with a failure
    Failed,
}

struct SequenceInner {
    name: String,
    state: SequenceState,
    failure: Option<String>,
    on_success: Option<Continuation>,
    on_failure: Option<Continuation>,
}

/// Shared handle to a running sequence
///
/// Clones refer to the same sequence.
#[derive(Clone)]
pub struct Sequence {
    inner: Arc<Mutex<SequenceInner>>,
}

impl Sequence {
    /// Create a sequence without callbacks
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SequenceInner {
                name: name.into(),
                state: SequenceState::Started,
                failure: None,
                on_success: None,
                on_failure: None,
            })),
        }
    }

    /// Run `f` when the sequence succeeds
    pub fn with_success(self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.lock().on_success = Some(Box::new(f));
        self
    }

    /// Run `f` when the sequence fails
    pub fn with_failure(self, f: impl FnOnce(&mut DeviceCtx<'_>) + Send + 'static) -> Self {
        self.lock().on_failure = Some(Box::new(f));
        self
    }

    /// A sub-sequence that completes this one when it completes
    pub fn child(&self, name: impl Into<String>) -> Self {
        let on_success = self.clone();
        let on_failure = self.clone();
        let child = Sequence::new(name);
        let reason = Arc::downgrade(&child.inner);
        child
            .with_success(move |ctx| on_success.succeed(ctx))
            .with_failure(move |ctx| {
                let why = reason
                    .upgrade()
                    .and_then(|inner| inner.lock().ok().and_then(|i| i.failure.clone()))
                    .unwrap_or_else(|| "sub-sequence failed".to_string());
                on_failure.fail(ctx, why)
            })
    }

    /// Sequence name
    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Current state
    pub fn state(&self) -> SequenceState {
        self.lock().state
    }

    /// Check if the sequence is still running
    pub fn is_active(&self) -> bool {
        self.state() == SequenceState::Started
    }

    /// Why the sequence failed
    pub fn failure_reason(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    /// Complete the sequence successfully
    ///
    /// No-op if it already completed.
    pub fn succeed(&self, ctx: &mut DeviceCtx<'_>) {
        let callback = {
            let mut inner = self.lock();
            if inner.state != SequenceState::Started {
                return;
            }
            inner.state = SequenceState::Succeeded;
            inner.on_failure = None;
            debug!("{}: {} succeeded", ctx.address(), inner.name);
            inner.on_success.take()
        };
        if let Some(callback) = callback {
            callback(ctx);
        }
    }

    /// Complete the sequence with a failure
    ///
    /// No-op if it already completed.
    pub fn fail(&self, ctx: &mut DeviceCtx<'_>, reason: impl Into<String>) {
        let callback = {
            let mut inner = self.lock();
            if inner.state != SequenceState::Started {
                return;
            }
            let reason = reason.into();
            warn!("{}: {} failed: {}", ctx.address(), inner.name, reason);
            inner.state = SequenceState::Failed;
            inner.failure = Some(reason);
            inner.on_success = None;
            inner.on_failure.take()
        };
        if let Some(callback) = callback {
            callback(ctx);
        }
    }

    /// Continuation failing the sequence with `reason`
    pub fn fail_with(&self, reason: impl Into<String>) -> Continuation {
        let seq = self.clone();
        let reason = reason.into();
        Box::new(move |ctx: &mut DeviceCtx<'_>| seq.fail(ctx, reason))
    }

    fn lock(&self) -> MutexGuard<'_, SequenceInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Sequence")
            .field("name", &inner.name)
            .field("state", &inner.state)
            .field("failure", &inner.failure)
            .finish()
    }
}
