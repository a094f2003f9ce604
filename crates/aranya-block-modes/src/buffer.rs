//! Scatter/gather views over caller-owned memory.

use alloc::vec::Vec;

use crate::error::{BufferTooSmallError, Result};

/// A read-only view over an ordered sequence of byte ranges.
///
/// The view never owns the underlying memory. Reading advances
/// an internal cursor.
#[derive(Clone, Debug, Default)]
pub struct BufferView<'a> {
    segments: Vec<&'a [u8]>,
    /// Index of the current segment.
    seg: usize,
    /// Offset into the current segment.
    pos: usize,
    remaining: usize,
}

impl<'a> BufferView<'a> {
    /// Creates a view over one contiguous range.
    pub fn new(data: &'a [u8]) -> Self {
        Self::from_segments([data])
    }

    /// Creates a view over several ranges, in order.
    pub fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let segments: Vec<&'a [u8]> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        let remaining = segments.iter().map(|s| s.len()).sum();
        Self {
            segments,
            seg: 0,
            pos: 0,
            remaining,
        }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reports whether all bytes have been read.
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Copies up to `out.len()` unread bytes into `out`,
    /// returning the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            let Some(seg) = self.segments.get(self.seg) else {
                break;
            };
            let avail = &seg[self.pos..];
            let take = avail.len().min(out.len() - n);
            out[n..n + take].copy_from_slice(&avail[..take]);
            n += take;
            self.pos += take;
            if self.pos == seg.len() {
                self.seg += 1;
                self.pos = 0;
            }
        }
        self.remaining -= n;
        n
    }

    /// Appends every unread byte to `dst`.
    pub(crate) fn gather_into(&mut self, dst: &mut Vec<u8>) -> Result<()> {
        dst.try_reserve(self.remaining)?;
        while let Some(seg) = self.segments.get(self.seg) {
            dst.extend_from_slice(&seg[self.pos..]);
            self.seg += 1;
            self.pos = 0;
        }
        self.remaining = 0;
        Ok(())
    }
}

impl<'a> From<&'a [u8]> for BufferView<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

/// A writable view over an ordered sequence of byte ranges.
#[derive(Debug, Default)]
pub struct BufferViewMut<'a> {
    segments: Vec<&'a mut [u8]>,
    seg: usize,
    pos: usize,
    remaining: usize,
    written: usize,
}

impl<'a> BufferViewMut<'a> {
    /// Creates a view over one contiguous range.
    pub fn new(data: &'a mut [u8]) -> Self {
        Self::from_segments([data])
    }

    /// Creates a view over several ranges, in order.
    pub fn from_segments<I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a mut [u8]>,
    {
        let segments: Vec<&'a mut [u8]> =
            segments.into_iter().filter(|s| !s.is_empty()).collect();
        let remaining = segments.iter().map(|s| s.len()).sum();
        Self {
            segments,
            seg: 0,
            pos: 0,
            remaining,
            written: 0,
        }
    }

    /// Returns the number of bytes that can still be written.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Returns the total number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Writes all of `data`, or nothing if it does not fit.
    pub fn write(&mut self, data: &[u8]) -> core::result::Result<(), BufferTooSmallError> {
        if data.len() > self.remaining {
            return Err(BufferTooSmallError {
                need: data.len(),
            });
        }
        let mut data = data;
        while !data.is_empty() {
            let Some(seg) = self.segments.get_mut(self.seg) else {
                break;
            };
            let avail = &mut seg[self.pos..];
            let take = avail.len().min(data.len());
            avail[..take].copy_from_slice(&data[..take]);
            data = &data[take..];
            self.pos += take;
            if self.pos == seg.len() {
                self.seg += 1;
                self.pos = 0;
            }
            self.remaining -= take;
            self.written += take;
        }
        Ok(())
    }
}

impl<'a> From<&'a mut [u8]> for BufferViewMut<'a> {
    fn from(data: &'a mut [u8]) -> Self {
        Self::new(data)
    }
}
