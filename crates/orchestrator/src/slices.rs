//! Single-pass slice input with one element of pushback.

/// Wraps the slice iterator so a slice pulled too early can be put back.
///
/// The input cannot be re-drawn, so a slice taken while the concurrency limit
/// is reached is parked here and handed out again by the next
/// [`SliceQueue::next_slice`].
#[derive(Debug)]
pub struct SliceQueue<I: Iterator> {
    source: I,
    pending: Option<I::Item>,
    source_done: bool,
}

impl<I: Iterator> SliceQueue<I> {
    pub fn new(source: I) -> Self {
        Self {
            source,
            pending: None,
            source_done: false,
        }
    }

    pub fn next_slice(&mut self) -> Option<I::Item> {
        if let Some(slice) = self.pending.take() {
            return Some(slice);
        }
        if self.source_done {
            return None;
        }
        let next = self.source.next();
        if next.is_none() {
            self.source_done = true;
        }
        next
    }

    /// Put back the slice last returned by [`SliceQueue::next_slice`].
    pub fn push_front(&mut self, slice: I::Item) {
        debug_assert!(self.pending.is_none(), "only one slice can be pushed back");
        self.pending = Some(slice);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// True once the source ran dry and nothing is parked.
    pub fn is_exhausted(&self) -> bool {
        self.source_done && self.pending.is_none()
    }
}
