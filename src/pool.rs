use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};

/// Pool of pre-allocated scratch vectors for the audio ingress.
///
/// Borrow is LIFO and blocks while the pool is empty, which bounds the
/// number of conversion buffers in flight. A borrowed vector whose
/// contents were moved into a channel returns to the pool empty and is
/// re-reserved to the configured capacity.
pub struct VectorPool {
    stack: Mutex<Vec<Vec<f32>>>,
    returned: Condvar,
    reserve: usize,
}

impl VectorPool {
    pub fn new(count: usize, reserve: usize) -> Self {
        assert!(count > 0, "vector pool must hold at least one buffer");
        let stack = (0..count).map(|_| Vec::with_capacity(reserve)).collect();
        Self {
            stack: Mutex::new(stack),
            returned: Condvar::new(),
            reserve,
        }
    }

    /// Take the most recently returned vector, blocking while none is free.
    pub fn borrow(&self) -> PooledVec<'_> {
        let mut stack = self.stack.lock().unwrap();
        loop {
            if let Some(vec) = stack.pop() {
                return PooledVec {
                    pool: self,
                    vec: Some(vec),
                };
            }
            stack = self.returned.wait(stack).unwrap();
        }
    }

    pub fn available(&self) -> usize {
        self.stack.lock().unwrap().len()
    }

    fn give_back(&self, mut vec: Vec<f32>) {
        vec.clear();
        if vec.capacity() < self.reserve {
            vec.reserve(self.reserve);
        }
        let mut stack = self.stack.lock().unwrap();
        stack.push(vec);
        self.returned.notify_one();
    }
}

/// Guard around a borrowed scratch vector; returns it on drop.
pub struct PooledVec<'a> {
    pool: &'a VectorPool,
    vec: Option<Vec<f32>>,
}

impl PooledVec<'_> {
    /// Move the contents out, leaving the guard to return a fresh buffer.
    pub fn take(&mut self) -> Vec<f32> {
        self.vec.take().unwrap_or_default()
    }
}

impl Deref for PooledVec<'_> {
    type Target = Vec<f32>;

    fn deref(&self) -> &Vec<f32> {
        self.vec.as_ref().expect("pooled vector already taken")
    }
}

impl DerefMut for PooledVec<'_> {
    fn deref_mut(&mut self) -> &mut Vec<f32> {
        self.vec.as_mut().expect("pooled vector already taken")
    }
}

impl Drop for PooledVec<'_> {
    fn drop(&mut self) {
        let vec = self.vec.take().unwrap_or_default();
        self.pool.give_back(vec);
    }
}
