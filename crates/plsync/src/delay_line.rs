use std::ops::Index;

/// Number of windows that fit in the backing store before the window has to be wrapped around.
const N_REPS: usize = 10;

/// A fixed length sliding window over the most recent samples.
/// The window is always available as one contiguous slice so that it can be correlated against taps.
///
/// # Diagram
/// Samples are written backwards from the end of the backing store.
/// ```text
/// | free ... | newest, ..., oldest | stale ... |
///            ^ tail                ^ tail+length
/// ```
/// Once the tail reaches the start of the store the most recent length-1 samples are copied to the end.
pub struct DelayLine<T> {
    data: Vec<T>,
    tail: usize,
    length: usize,
}

#[allow(unused)]
impl<T: Default + Copy> DelayLine<T> {
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "Delay line must hold at least one sample");
        let capacity = N_REPS * length;
        Self {
            data: vec![T::default(); capacity],
            tail: capacity - length,
            length,
        }
    }

    /// Inserts a new sample and discards the oldest one.
    pub fn push(&mut self, value: T) {
        if self.tail == 0 {
            // Keep the newest length-1 samples and move them to the end of the store
            let start = (N_REPS - 1) * self.length + 1;
            self.data.copy_within(0..self.length - 1, start);
            self.tail = start;
        }
        self.tail -= 1;
        self.data[self.tail] = value;
    }

    /// Refills the window with the default value.
    pub fn reset(&mut self) {
        self.data.fill(T::default());
        self.tail = self.data.len() - self.length;
    }
}

#[allow(unused)]
impl<T> DelayLine<T> {
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the window ordered from the newest to the oldest sample.
    pub fn window(&self) -> &[T] {
        &self.data[self.tail..self.tail + self.length]
    }

    pub fn newest(&self) -> &T {
        &self.data[self.tail]
    }

    pub fn oldest(&self) -> &T {
        &self.data[self.tail + self.length - 1]
    }
}

/// A fixed length sliding window that reads from the oldest to the newest sample.
/// This is the mirror image of [`DelayLine`] where samples are written forwards through the backing store.
pub struct ReversedDelayLine<T> {
    data: Vec<T>,
    // index of the oldest sample
    head: usize,
    length: usize,
}

#[allow(unused)]
impl<T: Default + Copy> ReversedDelayLine<T> {
    pub fn new(length: usize) -> Self {
        assert!(length > 0, "Delay line must hold at least one sample");
        Self {
            data: vec![T::default(); N_REPS * length],
            head: 0,
            length,
        }
    }

    /// Inserts a new sample and discards the oldest one.
    pub fn push(&mut self, value: T) {
        let last_head = (N_REPS - 1) * self.length;
        if self.head == last_head {
            // Keep the newest length-1 samples and move them to the start of the store
            let src = last_head + 1..last_head + self.length;
            self.data.copy_within(src, 0);
            self.data[self.length - 1] = value;
            self.head = 0;
            return;
        }
        self.head += 1;
        self.data[self.head + self.length - 1] = value;
    }

    /// Refills the window with the default value.
    pub fn reset(&mut self) {
        self.data.fill(T::default());
        self.head = 0;
    }
}

#[allow(unused)]
impl<T> ReversedDelayLine<T> {
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns the window ordered from the oldest to the newest sample.
    pub fn window(&self) -> &[T] {
        &self.data[self.head..self.head + self.length]
    }

    pub fn newest(&self) -> &T {
        &self.data[self.head + self.length - 1]
    }

    pub fn oldest(&self) -> &T {
        &self.data[self.head]
    }
}

impl<T> Index<usize> for DelayLine<T> {
    type Output = T;
    /// Index 0 is the newest sample.
    fn index(&self, index: usize) -> &Self::Output {
        assert!(index < self.length);
        &self.data[self.tail + index]
    }
}

impl<T> Index<usize> for ReversedDelayLine<T> {
    type Output = T;
    /// Index 0 is the oldest sample.
    fn index(&self, index: usize) -> &Self::Output {
        assert!(index < self.length);
        &self.data[self.head + index]
    }
}
