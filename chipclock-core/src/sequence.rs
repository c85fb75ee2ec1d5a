//! Growable buffer of fixed-size values with a sustain/repeat subrange.
//!
//! `Sequence<T>` backs instrument parameter sequences (plain `i32` steps or
//! envelope [`Phase`](crate::envelope::Phase)s) and waveform tables (`i16`
//! frames). Capacity is tracked separately from the logical length and only
//! grows, doubling when a replace needs more room.

use core::fmt::Debug;
use core::mem::size_of;
use core::ops::Range;

use crate::error::{Error, Result};

/// A value storable in a [`Sequence`].
pub trait SequenceValue: Copy + Default + Debug + PartialEq + Send + Sync + 'static {
    /// Logical components per value (an envelope phase has two).
    const COMPONENTS: usize;
}

macro_rules! scalar_values {
    ($($t:ty),*) => { $( impl SequenceValue for $t { const COMPONENTS: usize = 1; } )* };
}
scalar_values!(i8, i16, i32);

const MIN_CAPACITY: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct Sequence<T: SequenceValue> {
    values: Vec<T>,
    sustain: Range<usize>,
}

impl<T: SequenceValue> Default for Sequence<T> {
    fn default() -> Self {
        Self { values: Vec::new(), sustain: 0..0 }
    }
}

impl<T: SequenceValue> Sequence<T> {
    /// `length` default values, no sustain range.
    pub fn new(length: usize) -> Self {
        let mut s = Self::default();
        s.grow_to(length);
        s.values.resize(length, T::default());
        s
    }

    pub fn from_values(values: &[T]) -> Self {
        let mut s = Self::default();
        s.replace_values(values);
        s
    }

    #[inline] pub fn len(&self) -> usize { self.values.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.values.is_empty() }
    #[inline] pub fn capacity(&self) -> usize { self.values.capacity() }
    #[inline] pub fn number_of_components(&self) -> usize { T::COMPONENTS }
    #[inline] pub fn value_size(&self) -> usize { size_of::<T>() }
    #[inline] pub fn values(&self) -> &[T] { &self.values }
    #[inline] pub fn sustain_range(&self) -> Range<usize> { self.sustain.clone() }

    #[inline]
    pub fn value_at(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    /// Resize, filling new slots with `T::default()`. The sustain range is
    /// clipped to the new length.
    pub fn set_len(&mut self, length: usize) {
        self.grow_to(length);
        self.values.resize(length, T::default());
        self.clip_sustain();
    }

    /// Replace every value. Keeps the allocation when `values` fits.
    pub fn replace_values(&mut self, values: &[T]) {
        self.grow_to(values.len());
        self.values.clear();
        self.values.extend_from_slice(values);
        self.clip_sustain();
    }

    /// Replace `range` (which must lie inside `[0, len]`) with `values`.
    ///
    /// The replacement may be shorter or longer than the range; values before
    /// and after it are preserved in order.
    pub fn replace_values_in_range(&mut self, range: Range<usize>, values: &[T]) -> Result<()> {
        let len = self.values.len();
        if range.start > range.end || range.end > len {
            return Err(Error::InvalidRange { start: range.start, end: range.end, len });
        }
        let new_len = len - (range.end - range.start) + values.len();
        self.grow_to(new_len);
        self.values.splice(range, values.iter().copied());
        self.clip_sustain();
        Ok(())
    }

    /// Set the sustain/repeat range; must satisfy `start <= end <= len`.
    pub fn set_sustain_range(&mut self, range: Range<usize>) -> Result<()> {
        let len = self.values.len();
        if range.start > range.end || range.end > len {
            return Err(Error::InvalidRange { start: range.start, end: range.end, len });
        }
        self.sustain = range;
        Ok(())
    }

    fn grow_to(&mut self, needed: usize) {
        let cap = self.values.capacity();
        if needed <= cap {
            return;
        }
        let target = needed.max(cap * 2).max(MIN_CAPACITY);
        self.values.reserve_exact(target - self.values.len());
    }

    fn clip_sustain(&mut self) {
        let len = self.values.len();
        let end = self.sustain.end.min(len);
        let start = self.sustain.start.min(end);
        self.sustain = start..end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_then_read_back() {
        let mut s: Sequence<i32> = Sequence::new(2);
        let v = [3, -1, 7, 7, 0, 12];
        s.replace_values(&v);
        assert_eq!(s.len(), v.len());
        for (i, x) in v.iter().enumerate() {
            assert_eq!(s.value_at(i), Some(x));
        }
        assert_eq!(s.value_at(v.len()), None);
    }

    #[test]
    fn shrinking_replace_keeps_capacity() {
        let mut s = Sequence::from_values(&[1i16; 32]);
        let cap = s.capacity();
        s.replace_values(&[5, 6]);
        assert_eq!(s.capacity(), cap);
        s.replace_values(&[0; 33]);
        assert!(s.capacity() >= 33 && s.capacity() >= cap);
    }

    #[test]
    fn range_replace_preserves_outside() {
        let mut s = Sequence::from_values(&[0, 1, 2, 3, 4]);
        s.replace_values_in_range(1..3, &[10, 11, 12]).unwrap();
        assert_eq!(s.values(), &[0, 10, 11, 12, 3, 4]);
        s.replace_values_in_range(6..6, &[9]).unwrap();
        assert_eq!(s.values(), &[0, 10, 11, 12, 3, 4, 9]);
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let mut s = Sequence::from_values(&[1, 2, 3]);
        assert!(s.replace_values_in_range(2..5, &[0, 0, 0]).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let backwards = 2..1;
        assert!(s.replace_values_in_range(backwards, &[0]).is_err());
        assert_eq!(s.values(), &[1, 2, 3]);
    }

    #[test]
    fn sustain_range_is_validated_and_clipped() {
        let mut s = Sequence::from_values(&[1, 2, 3, 4]);
        assert!(s.set_sustain_range(1..5).is_err());
        s.set_sustain_range(1..4).unwrap();
        s.replace_values(&[1, 2]);
        assert_eq!(s.sustain_range(), 1..2);
        assert_eq!(s.number_of_components(), 1);
        assert_eq!(s.value_size(), 4);
    }
}
