//! Ordered ownership of disposable resources.
//!
//! A [`ResourceTracker`] is a list of release actions appended in acquisition
//! order. Disposing the tracker drains the list and runs every action exactly
//! once, in that same order, collecting failures instead of stopping at the
//! first one.

use std::{
    any::Any,
    borrow::Cow,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::BoxError;

/// A resource that must be released explicitly.
///
/// Receivers, pumps and factories all implement this so an owner can release
/// them uniformly. Implementations should be idempotent: calling `dispose`
/// a second time is a no-op.
pub trait Dispose: Send + Sync {
    fn dispose(&self) -> Result<(), BoxError>;
}

type Release = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

struct Entry {
    label: Cow<'static, str>,
    release: Release,
}

/// Registry of acquired resources that are released together.
#[derive(Default)]
pub struct ResourceTracker {
    entries: Vec<Entry>,
}

impl ResourceTracker {
    /// Creates a tracker with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a shared resource; its [`Dispose::dispose`] runs on teardown.
    pub fn track<R>(&mut self, label: impl Into<Cow<'static, str>>, resource: Arc<R>)
    where
        R: Dispose + ?Sized + 'static,
    {
        self.register(label, move || resource.dispose());
    }

    /// Registers an arbitrary release action.
    pub fn register<F>(&mut self, label: impl Into<Cow<'static, str>>, release: F)
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.entries.push(Entry {
            label: label.into(),
            release: Box::new(release),
        });
    }

    /// Number of resources still awaiting release.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if every registered resource has been released.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every tracked resource in registration order.
    ///
    /// The list is drained before any action runs, so each action runs at most
    /// once no matter how often this is called. A failing or panicking action
    /// is recorded and the remaining actions still run.
    pub fn dispose(&mut self) -> Result<(), DisposeError> {
        release_all(mem::take(&mut self.entries))
    }
}

impl fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| &entry.label))
            .finish()
    }
}

impl Drop for ResourceTracker {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        warn!(
            pending = self.entries.len(),
            "resource tracker dropped without dispose; releasing remaining resources"
        );
        // Failures are already logged per resource.
        let _ = release_all(mem::take(&mut self.entries));
    }
}

fn release_all(entries: Vec<Entry>) -> Result<(), DisposeError> {
    let attempted = entries.len();
    let mut failures = Vec::new();

    for Entry { label, release } in entries {
        let source = match panic::catch_unwind(AssertUnwindSafe(release)) {
            Ok(Ok(())) => {
                debug!(resource = %label, "disposed");
                continue;
            }
            Ok(Err(source)) => source,
            Err(payload) => panic_message(payload).into(),
        };
        error!(resource = %label, error = %source, "failed to dispose resource");
        failures.push(DisposeFailure { label, source });
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(DisposeError {
            attempted,
            failures,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("release panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("release panicked: {message}")
    } else {
        "release panicked".to_string()
    }
}

/// One resource that failed to release.
#[derive(Debug)]
pub struct DisposeFailure {
    label: Cow<'static, str>,
    source: BoxError,
}

impl DisposeFailure {
    /// Label the resource was registered under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Why the release failed.
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Aggregate of every release failure from a single dispose pass.
#[derive(Debug, Error)]
#[error("{} of {attempted} resource(s) failed to dispose", .failures.len())]
pub struct DisposeError {
    attempted: usize,
    failures: Vec<DisposeFailure>,
}

impl DisposeError {
    /// Number of release actions that ran in the failing pass.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Failed resources, in registration order.
    pub fn failures(&self) -> &[DisposeFailure] {
        &self.failures
    }
}
