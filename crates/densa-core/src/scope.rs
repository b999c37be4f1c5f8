//! Bulk lifetime brackets for tensors
//!
//! Kernels produce many short-lived intermediates (im2col buffers, per-slice
//! matrices, padded copies). Each tensor holds a [`Lease`]: one counted
//! reference on its segment, registered in the innermost open scope of its
//! [`ScopeStack`]. Disposing the lease releases the reference and removes the
//! registration; popping a scope disposes every lease still registered in it,
//! in creation order.
//!
//! Dispose is idempotent and also runs on `Drop`, so each alias releases its
//! segment exactly once no matter which path (explicit dispose, scope pop or
//! drop) gets there first.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::context::TensorContext;
use crate::segment::Segment;

/// Identifier of an open scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

struct LeaseState {
    id: u64,
    segment: Segment,
    disposed: AtomicBool,
    frame: Mutex<Weak<ScopeFrame>>,
}

impl LeaseState {
    /// Release the segment reference once; true if this call did it
    fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.segment.release();
        true
    }
}

struct ScopeFrame {
    id: ScopeId,
    entries: Mutex<BTreeMap<u64, Arc<LeaseState>>>,
}

impl ScopeFrame {
    fn deregister(&self, lease_id: u64) {
        self.entries.lock().remove(&lease_id);
    }

    /// Dispose everything still registered; returns how many were disposed
    fn dispose_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock());
        entries.values().filter(|state| state.dispose()).count()
    }
}

/// LIFO stack of open scopes owned by a [`TensorContext`]
pub struct ScopeStack {
    frames: Mutex<Vec<Arc<ScopeFrame>>>,
    next_lease: AtomicU64,
    next_scope: AtomicU64,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            next_lease: AtomicU64::new(0),
            next_scope: AtomicU64::new(0),
        }
    }

    /// Open a new innermost scope
    pub fn push(&self) -> ScopeId {
        let id = ScopeId(self.next_scope.fetch_add(1, Ordering::Relaxed));
        let mut frames = self.frames.lock();
        frames.push(Arc::new(ScopeFrame {
            id,
            entries: Mutex::new(BTreeMap::new()),
        }));
        tracing::debug!(scope = id.0, depth = frames.len(), "scope pushed");
        id
    }

    /// Close the innermost scope, disposing every tensor still registered.
    ///
    /// Returns the number of tensors disposed, or `None` when no scope is open.
    pub fn pop(&self) -> Option<usize> {
        // Take the frame out before disposing so deregistration cannot deadlock
        let frame = self.frames.lock().pop()?;
        let disposed = frame.dispose_all();
        tracing::debug!(scope = frame.id.0, disposed, "scope popped");
        Some(disposed)
    }

    /// Pop scopes until `scope` has been closed; returns total disposed
    pub fn pop_to(&self, scope: ScopeId) -> usize {
        let mut disposed = 0;
        while let Some(top) = self.top() {
            if top < scope {
                break;
            }
            disposed += self.pop().unwrap_or(0);
            if top == scope {
                break;
            }
        }
        disposed
    }

    /// Close every scope, innermost first
    pub fn dispose_all(&self) -> usize {
        let mut disposed = 0;
        while let Some(count) = self.pop() {
            disposed += count;
        }
        if disposed > 0 {
            tracing::warn!(disposed, "tensors still alive at scope teardown");
        }
        disposed
    }

    /// Innermost open scope
    pub fn top(&self) -> Option<ScopeId> {
        self.frames.lock().last().map(|f| f.id)
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Number of live registrations in the innermost scope
    pub fn live_in_top(&self) -> usize {
        self.frames
            .lock()
            .last()
            .map(|f| f.entries.lock().len())
            .unwrap_or(0)
    }

    fn register(&self, segment: Segment) -> Arc<LeaseState> {
        let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        let frames = self.frames.lock();
        let frame = frames.last();
        let state = Arc::new(LeaseState {
            id,
            segment,
            disposed: AtomicBool::new(false),
            frame: Mutex::new(frame.map(Arc::downgrade).unwrap_or_default()),
        });
        if let Some(frame) = frame {
            frame.entries.lock().insert(id, state.clone());
        }
        state
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

/// One counted reference on a segment, tracked by the innermost scope
pub struct Lease {
    state: Arc<LeaseState>,
    context: TensorContext,
}

impl Lease {
    /// Take a reference on `segment` and register it in the innermost scope
    pub fn acquire(segment: Segment, context: &TensorContext) -> Self {
        segment.add_ref();
        let state = context.scopes().register(segment);
        Self {
            state,
            context: context.clone(),
        }
    }

    /// New lease on another segment in the same context
    pub fn derive(&self, segment: Segment) -> Self {
        Self::acquire(segment, &self.context)
    }

    /// The leased segment
    pub fn segment(&self) -> &Segment {
        &self.state.segment
    }

    /// Context that created this lease
    pub fn context(&self) -> &TensorContext {
        &self.context
    }

    /// Release the reference and leave the scope; later calls do nothing
    pub fn dispose(&self) {
        if self.state.dispose() {
            self.detach_from_scope();
        }
    }

    /// Whether the reference has been given back
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    /// Keep the reference but stop the current scope from disposing it.
    ///
    /// Used for results that must outlive the bracket they were built in.
    pub fn detach_from_scope(&self) {
        let frame = std::mem::take(&mut *self.state.frame.lock());
        // A frame that is already gone means teardown is running
        if let Some(frame) = frame.upgrade() {
            frame.deregister(self.state.id);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.state.id)
            .field("disposed", &self.is_disposed())
            .field("segment", &self.state.segment)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_depth() {
        let stack = ScopeStack::new();
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.pop(), None);

        let outer = stack.push();
        let inner = stack.push();
        assert!(inner > outer);
        assert_eq!(stack.top(), Some(inner));
        assert_eq!(stack.depth(), 2);

        assert_eq!(stack.pop(), Some(0));
        assert_eq!(stack.top(), Some(outer));
    }

    #[test]
    fn test_pop_disposes_stragglers() {
        let context = TensorContext::default();
        context.push_scope();
        let segment = context.create_segment(4, true);
        let lease = Lease::acquire(segment.clone(), &context);
        assert_eq!(segment.ref_count(), 1);

        assert_eq!(context.pop_scope(), Some(1));
        assert!(lease.is_disposed());
        assert!(!segment.is_valid());
    }

    #[test]
    fn test_explicit_dispose_deregisters() {
        let context = TensorContext::default();
        context.push_scope();
        let segment = context.create_segment(4, true);
        let kept = Lease::acquire(segment.clone(), &context);
        let alias = kept.derive(segment.clone());
        assert_eq!(segment.ref_count(), 2);
        assert_eq!(context.scopes().live_in_top(), 2);

        alias.dispose();
        alias.dispose();
        assert_eq!(segment.ref_count(), 1);
        assert_eq!(context.scopes().live_in_top(), 1);

        assert_eq!(context.pop_scope(), Some(1));
        assert!(kept.is_disposed());
    }

    #[test]
    fn test_drop_releases_once() {
        let context = TensorContext::default();
        let segment = context.create_segment(2, true);
        {
            let _a = Lease::acquire(segment.clone(), &context);
            let _b = Lease::acquire(segment.clone(), &context);
            assert_eq!(segment.ref_count(), 2);
        }
        assert_eq!(segment.ref_count(), 0);
        assert!(!segment.is_valid());
    }

    #[test]
    fn test_detached_lease_survives_pop() {
        let context = TensorContext::default();
        context.push_scope();
        let segment = context.create_segment(3, true);
        let result = Lease::acquire(segment.clone(), &context);
        result.detach_from_scope();

        assert_eq!(context.pop_scope(), Some(0));
        assert!(!result.is_disposed());
        assert!(segment.is_valid());
    }

    #[test]
    fn test_pop_to_closes_nested() {
        let context = TensorContext::default();
        let outer = context.push_scope();
        let _a = Lease::acquire(context.create_segment(1, true), &context);
        context.push_scope();
        let _b = Lease::acquire(context.create_segment(1, true), &context);
        context.push_scope();

        assert_eq!(context.scopes().pop_to(outer), 2);
        assert_eq!(context.scopes().depth(), 0);
    }

    #[test]
    fn test_dispose_all_innermost_first() {
        let context = TensorContext::default();
        context.push_scope();
        let a = Lease::acquire(context.create_segment(1, true), &context);
        context.push_scope();
        let b = Lease::acquire(context.create_segment(1, true), &context);

        assert_eq!(context.scopes().dispose_all(), 2);
        assert!(a.is_disposed());
        assert!(b.is_disposed());
        // Dropping after teardown is a no-op
        drop(a);
        drop(b);
    }
}
