//! Fixed-capacity sample history for recursive filters.
//!
//! The write cursor advances modulo the capacity; taps are read backwards
//! from the cursor, so `tap(0)` is the most recent sample. Storage is inline
//! (no heap), which keeps a filter stage a plain value type.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayLine<const N: usize> {
    buf: [f64; N],
    cursor: usize,
}

impl<const N: usize> Default for DelayLine<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DelayLine<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0.0; N],
            cursor: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Advance the cursor and store `value` as the newest sample.
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.cursor = (self.cursor + 1) % N;
        self.buf[self.cursor] = value;
    }

    /// Sample written `age` pushes ago. `age` must be `< N`.
    #[inline]
    pub fn tap(&self, age: usize) -> f64 {
        debug_assert!(age < N);
        self.buf[(self.cursor + N - age) % N]
    }

    pub fn clear(&mut self) {
        self.buf = [0.0; N];
        self.cursor = 0;
    }
}
