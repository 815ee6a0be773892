use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring buffer overflow: pushing {requested} with {available} free")]
    Overflow { requested: usize, available: usize },
    #[error("ring buffer underflow: requested {requested} with {buffered} buffered")]
    Underflow { requested: usize, buffered: usize },
}

/// Fixed-capacity FIFO used for sliding-window extraction inside a stage.
///
/// All operations are O(n) in elements moved with at most two contiguous
/// copies per call (wrap-around). Not thread-safe: each stage worker owns
/// exactly one instance.
pub struct RingBuffer<T> {
    buf: Box<[T]>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            buf: vec![T::default(); capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, src: &[T]) -> Result<(), RingError> {
        if src.len() > self.available() {
            return Err(RingError::Overflow {
                requested: src.len(),
                available: self.available(),
            });
        }

        let first = src.len().min(self.capacity() - self.write_pos);
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&src[..first]);
        if src.len() > first {
            self.buf[..src.len() - first].copy_from_slice(&src[first..]);
        }

        self.write_pos = (self.write_pos + src.len()) % self.capacity();
        self.len += src.len();
        Ok(())
    }

    pub fn pop(&mut self, dst: &mut [T]) -> Result<(), RingError> {
        self.peek(dst, 0)?;
        self.skip(dst.len())
    }

    /// Non-destructive read of `dst.len()` elements starting `offset`
    /// elements past the read cursor.
    pub fn peek(&self, dst: &mut [T], offset: usize) -> Result<(), RingError> {
        if offset + dst.len() > self.len {
            return Err(RingError::Underflow {
                requested: offset + dst.len(),
                buffered: self.len,
            });
        }

        let start = (self.read_pos + offset) % self.capacity();
        let first = dst.len().min(self.capacity() - start);
        dst[..first].copy_from_slice(&self.buf[start..start + first]);
        if dst.len() > first {
            let remaining = dst.len() - first;
            dst[first..].copy_from_slice(&self.buf[..remaining]);
        }
        Ok(())
    }

    /// Advance the read cursor without copying.
    pub fn skip(&mut self, count: usize) -> Result<(), RingError> {
        if count > self.len {
            return Err(RingError::Underflow {
                requested: count,
                buffered: self.len,
            });
        }
        self.read_pos = (self.read_pos + count) % self.capacity();
        self.len -= count;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }
}
