//! Reference-counted scalar buffers
//!
//! A [`Segment`] is the unit of storage every tensor points at. It comes in
//! three flavours:
//!
//! - **Owned**: a one-shot buffer with a single owner. `add_ref`/`release`
//!   are inert and the segment is always valid; storage goes away with the
//!   last handle.
//! - **Pooled**: a buffer checked out of a [`SegmentPool`]. Reference counts
//!   are real: when `release` brings the count to zero (or below) the buffer
//!   is moved back into the pool and the segment becomes invalid for good.
//! - **View**: `(offset, stride, length)` over another segment's storage. It
//!   owns nothing, forwards `add_ref`/`release` to its source and computes
//!   `offset + index * stride` for every access.
//!
//! `Segment` itself is a cheap handle (`Clone` is an `Arc` clone). Cloning a
//! handle never touches the reference count; counted ownership is what
//! [`Lease`](crate::scope::Lease) provides on top.
//!
//! # Release semantics
//!
//! Storage of a released pooled segment is physically moved out of the
//! segment before it reaches the pool, so a stale handle can never observe a
//! buffer that was handed to someone else. Every access on such a handle
//! fails with [`TensorError::UseAfterRelease`].
//!
//! # Locking
//!
//! Storage sits behind a `parking_lot::RwLock`. Reads use recursive read
//! locks, so several borrows of aliased segments can coexist on one thread.
//! Do not hold a [`Contiguous`] borrow of a segment while writing to any
//! segment that shares its storage.

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, TensorError};
use crate::pool::SegmentPool;

/// Element type of every segment
pub type Scalar = f32;

/// Storage flavour of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SegmentKind {
    /// Single-owner buffer, never pooled
    Owned,
    /// Buffer checked out of a segment pool
    Pooled,
    /// Strided window over another segment
    View,
}

struct ArrayStorage {
    data: RwLock<Vec<Scalar>>,
    size: usize,
    ref_count: AtomicIsize,
    valid: AtomicBool,
    pool: Option<Arc<SegmentPool>>,
}

impl ArrayStorage {
    fn new(values: Vec<Scalar>, pool: Option<Arc<SegmentPool>>) -> Self {
        Self {
            size: values.len(),
            data: RwLock::new(values),
            ref_count: AtomicIsize::new(0),
            valid: AtomicBool::new(true),
            pool,
        }
    }

    fn read(&self, kind: SegmentKind) -> Result<RwLockReadGuard<'_, Vec<Scalar>>> {
        let guard = self.data.read_recursive();
        if !self.valid.load(Ordering::Acquire) {
            return Err(TensorError::use_after_release(kind, self.size));
        }
        Ok(guard)
    }

    fn write(&self, kind: SegmentKind) -> Result<RwLockWriteGuard<'_, Vec<Scalar>>> {
        let guard = self.data.write();
        if !self.valid.load(Ordering::Acquire) {
            return Err(TensorError::use_after_release(kind, self.size));
        }
        Ok(guard)
    }

    /// Flip validity off and take the buffer; only the first caller gets it.
    fn invalidate(&self) -> Option<Vec<Scalar>> {
        let mut guard = self.data.write();
        if self.valid.swap(false, Ordering::AcqRel) {
            Some(std::mem::take(&mut *guard))
        } else {
            None
        }
    }
}

impl Drop for ArrayStorage {
    fn drop(&mut self) {
        if let Some(pool) = &self.pool {
            if *self.valid.get_mut() {
                pool.release(std::mem::take(self.data.get_mut()));
            }
        }
    }
}

struct StridedView {
    source: Segment,
    offset: usize,
    stride: usize,
    len: usize,
}

enum SegmentRepr {
    Owned(ArrayStorage),
    Pooled(ArrayStorage),
    View(StridedView),
}

/// Handle to a reference-counted scalar buffer
#[derive(Clone)]
pub struct Segment {
    repr: Arc<SegmentRepr>,
}

/// Root storage of a segment together with the affine map into it
#[derive(Clone, Debug)]
pub struct UnderlyingStorage {
    /// Owned or pooled segment that holds the actual buffer
    pub root: Segment,
    /// Position of element 0 inside `root`
    pub offset: usize,
    /// Distance between consecutive elements inside `root`
    pub stride: usize,
}

/// Contiguous read access to a segment's elements.
///
/// `Borrowed` is a zero-copy read guard over the storage; `Materialized` is a
/// temporary buffer gathered from a strided view.
pub enum Contiguous<'a> {
    Borrowed(MappedRwLockReadGuard<'a, [Scalar]>),
    Materialized(Vec<Scalar>),
}

impl Contiguous<'_> {
    /// Whether the slice points straight into segment storage
    pub fn is_borrowed(&self) -> bool {
        matches!(self, Contiguous::Borrowed(_))
    }
}

impl Deref for Contiguous<'_> {
    type Target = [Scalar];

    fn deref(&self) -> &[Scalar] {
        match self {
            Contiguous::Borrowed(guard) => guard,
            Contiguous::Materialized(values) => values,
        }
    }
}

impl Segment {
    /// Create an owned segment over `values`
    pub fn owned(values: Vec<Scalar>) -> Self {
        Self {
            repr: Arc::new(SegmentRepr::Owned(ArrayStorage::new(values, None))),
        }
    }

    /// Create an owned segment of `size` zeros
    pub fn zeros(size: usize) -> Self {
        Self::owned(vec![0.0; size])
    }

    /// Wrap a buffer that was checked out of `pool`
    pub fn pooled(values: Vec<Scalar>, pool: Arc<SegmentPool>) -> Self {
        Self {
            repr: Arc::new(SegmentRepr::Pooled(ArrayStorage::new(values, Some(pool)))),
        }
    }

    /// Strided window of `len` elements starting at `offset`.
    ///
    /// Views of views are flattened: the result always points at the root
    /// storage with composed offset and stride, so slicing is O(1).
    pub fn view(&self, offset: usize, stride: usize, len: usize) -> Result<Segment> {
        let size = self.size();
        if stride == 0 || (len > 0 && offset + (len - 1) * stride >= size) {
            return Err(TensorError::index_out_of_range(
                &[offset, stride, len],
                &[size],
            ));
        }
        let storage = self
            .underlying_storage()
            .ok_or_else(|| TensorError::use_after_release(self.kind(), size))?;

        Ok(Segment {
            repr: Arc::new(SegmentRepr::View(StridedView {
                source: storage.root,
                offset: storage.offset + offset * storage.stride,
                stride: storage.stride * stride,
                len,
            })),
        })
    }

    /// Storage flavour
    pub fn kind(&self) -> SegmentKind {
        match &*self.repr {
            SegmentRepr::Owned(_) => SegmentKind::Owned,
            SegmentRepr::Pooled(_) => SegmentKind::Pooled,
            SegmentRepr::View(_) => SegmentKind::View,
        }
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        match &*self.repr {
            SegmentRepr::Owned(s) | SegmentRepr::Pooled(s) => s.size,
            SegmentRepr::View(v) => v.len,
        }
    }

    /// Whether the segment has zero elements
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// False once the backing storage has been released
    pub fn is_valid(&self) -> bool {
        match &*self.repr {
            SegmentRepr::Owned(_) => true,
            SegmentRepr::Pooled(s) => s.valid.load(Ordering::Acquire),
            SegmentRepr::View(v) => v.source.is_valid(),
        }
    }

    /// Current reference count (owned segments always report 1)
    pub fn ref_count(&self) -> isize {
        match &*self.repr {
            SegmentRepr::Owned(_) => 1,
            SegmentRepr::Pooled(s) => s.ref_count.load(Ordering::Acquire),
            SegmentRepr::View(v) => v.source.ref_count(),
        }
    }

    /// Take a reference; returns the updated count
    pub fn add_ref(&self) -> isize {
        match &*self.repr {
            SegmentRepr::Owned(_) => 1,
            SegmentRepr::Pooled(s) => s.ref_count.fetch_add(1, Ordering::AcqRel) + 1,
            SegmentRepr::View(v) => v.source.add_ref(),
        }
    }

    /// Drop a reference; returns the updated count.
    ///
    /// A pooled segment whose count reaches zero hands its buffer back to the
    /// pool and becomes invalid.
    pub fn release(&self) -> isize {
        match &*self.repr {
            SegmentRepr::Owned(_) => 1,
            SegmentRepr::Pooled(s) => {
                let count = s.ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
                if count <= 0 {
                    if let Some(buffer) = s.invalidate() {
                        tracing::trace!(size = s.size, "pooled segment returned");
                        if let Some(pool) = &s.pool {
                            pool.release(buffer);
                        }
                    }
                }
                count
            }
            SegmentRepr::View(v) => v.source.release(),
        }
    }

    /// Root storage plus (offset, stride, len) of this segment inside it
    fn layout(&self) -> (&ArrayStorage, usize, usize, usize) {
        match &*self.repr {
            SegmentRepr::Owned(s) | SegmentRepr::Pooled(s) => (s, 0, 1, s.size),
            SegmentRepr::View(v) => {
                let (storage, offset, stride, _) = v.source.layout();
                (storage, offset + v.offset * stride, stride * v.stride, v.len)
            }
        }
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Result<Scalar> {
        let (storage, offset, stride, len) = self.layout();
        if index >= len {
            return Err(TensorError::index_out_of_range(&[index], &[len]));
        }
        let data = storage.read(self.kind())?;
        Ok(data[offset + index * stride])
    }

    /// Overwrite the element at `index`
    pub fn set(&self, index: usize, value: Scalar) -> Result<()> {
        let (storage, offset, stride, len) = self.layout();
        if index >= len {
            return Err(TensorError::index_out_of_range(&[index], &[len]));
        }
        let mut data = storage.write(self.kind())?;
        data[offset + index * stride] = value;
        Ok(())
    }

    /// Copy `values` into this segment starting at `target_offset`
    pub fn copy_from(&self, values: &[Scalar], target_offset: usize) -> Result<()> {
        let (storage, offset, stride, len) = self.layout();
        if target_offset + values.len() > len {
            return Err(TensorError::index_out_of_range(
                &[target_offset + values.len()],
                &[len],
            ));
        }
        let mut data = storage.write(self.kind())?;
        if stride == 1 {
            let start = offset + target_offset;
            data[start..start + values.len()].copy_from_slice(values);
        } else {
            for (i, value) in values.iter().enumerate() {
                data[offset + (target_offset + i) * stride] = *value;
            }
        }
        Ok(())
    }

    /// Copy every element into `destination` (which must be at least `size()` long)
    pub fn copy_to(&self, destination: &mut [Scalar]) -> Result<()> {
        let (storage, offset, stride, len) = self.layout();
        if destination.len() < len {
            return Err(TensorError::shape_mismatch(
                "copy_to",
                vec![len],
                vec![destination.len()],
            ));
        }
        let data = storage.read(self.kind())?;
        if stride == 1 {
            destination[..len].copy_from_slice(&data[offset..offset + len]);
        } else {
            for (i, slot) in destination.iter_mut().take(len).enumerate() {
                *slot = data[offset + i * stride];
            }
        }
        Ok(())
    }

    /// Copy `count` elements from `source_offset` into `other` at `target_offset`
    pub fn copy_to_segment(
        &self,
        other: &Segment,
        source_offset: usize,
        target_offset: usize,
        count: usize,
    ) -> Result<()> {
        if source_offset + count > self.size() {
            return Err(TensorError::index_out_of_range(
                &[source_offset + count],
                &[self.size()],
            ));
        }
        // Gather first: `other` may share storage with `self`
        let mut values = vec![0.0; count];
        let (storage, offset, stride, _) = self.layout();
        {
            let data = storage.read(self.kind())?;
            for (i, slot) in values.iter_mut().enumerate() {
                *slot = data[offset + (source_offset + i) * stride];
            }
        }
        other.copy_from(&values, target_offset)
    }

    /// Zero every element
    pub fn clear(&self) -> Result<()> {
        self.fill(0.0)
    }

    /// Set every element to `value`
    pub fn fill(&self, value: Scalar) -> Result<()> {
        self.with_contiguous_mut(|slice| slice.fill(value))
    }

    /// Replace every element with `f(element)`
    pub fn map_in_place(&self, f: impl Fn(Scalar) -> Scalar) -> Result<()> {
        self.with_contiguous_mut(|slice| {
            for value in slice.iter_mut() {
                *value = f(*value);
            }
        })
    }

    /// Owned copy of the elements
    pub fn to_vec(&self) -> Result<Vec<Scalar>> {
        let mut values = vec![0.0; self.size()];
        self.copy_to(&mut values)?;
        Ok(values)
    }

    /// Lazy element sequence; calling `values()` again restarts it
    pub fn values(&self) -> SegmentValues {
        SegmentValues {
            segment: self.clone(),
            position: 0,
            end: self.size(),
        }
    }

    /// First `count` elements formatted for logs and debug output
    pub fn preview(&self, count: usize) -> String {
        if !self.is_valid() {
            return "<released>".to_string();
        }
        let shown: Vec<String> = self
            .values()
            .take(count)
            .map(|v| format!("{v:.4}"))
            .collect();
        let ellipsis = if self.size() > count { ", ..." } else { "" };
        format!("[{}{}]", shown.join(", "), ellipsis)
    }

    /// Whether the elements are adjacent in storage
    pub fn is_contiguous(&self) -> bool {
        let (_, _, stride, _) = self.layout();
        stride == 1
    }

    /// Contiguous read access, zero-copy when the layout allows it
    pub fn borrow_contiguous(&self) -> Result<Contiguous<'_>> {
        let (storage, offset, stride, len) = self.layout();
        let data = storage.read(self.kind())?;
        if stride == 1 {
            return Ok(Contiguous::Borrowed(RwLockReadGuard::map(data, |v| {
                &v[offset..offset + len]
            })));
        }
        let values = (0..len).map(|i| data[offset + i * stride]).collect();
        Ok(Contiguous::Materialized(values))
    }

    /// Run `f` over a mutable contiguous slice of the elements.
    ///
    /// Strided views are gathered into scratch space and scattered back after
    /// `f` returns. `f` must not access storage shared with this segment.
    pub fn with_contiguous_mut<R>(&self, f: impl FnOnce(&mut [Scalar]) -> R) -> Result<R> {
        let (storage, offset, stride, len) = self.layout();
        let mut data = storage.write(self.kind())?;
        if stride == 1 {
            return Ok(f(&mut data[offset..offset + len]));
        }
        let mut scratch: Vec<Scalar> = (0..len).map(|i| data[offset + i * stride]).collect();
        let result = f(&mut scratch);
        for (i, value) in scratch.into_iter().enumerate() {
            data[offset + i * stride] = value;
        }
        Ok(result)
    }

    /// Root storage and affine map, or `None` once released
    pub fn underlying_storage(&self) -> Option<UnderlyingStorage> {
        if !self.is_valid() {
            return None;
        }
        match &*self.repr {
            SegmentRepr::Owned(_) | SegmentRepr::Pooled(_) => Some(UnderlyingStorage {
                root: self.clone(),
                offset: 0,
                stride: 1,
            }),
            SegmentRepr::View(v) => {
                let parent = v.source.underlying_storage()?;
                Some(UnderlyingStorage {
                    offset: parent.offset + v.offset * parent.stride,
                    stride: parent.stride * v.stride,
                    root: parent.root,
                })
            }
        }
    }

    /// Whether both handles resolve to the same root storage
    pub fn shares_storage(&self, other: &Segment) -> bool {
        let (a, ..) = self.layout();
        let (b, ..) = other.layout();
        std::ptr::eq(a, b)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("ref_count", &self.ref_count())
            .field("valid", &self.is_valid())
            .field("values", &self.preview(8))
            .finish()
    }
}

/// Restartable element iterator returned by [`Segment::values`]
#[derive(Clone)]
pub struct SegmentValues {
    segment: Segment,
    position: usize,
    end: usize,
}

impl Iterator for SegmentValues {
    type Item = Scalar;

    fn next(&mut self) -> Option<Scalar> {
        if self.position >= self.end {
            return None;
        }
        // A released segment ends the sequence
        let value = self.segment.get(self.position).ok()?;
        self.position += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.end - self.position))
    }
}
