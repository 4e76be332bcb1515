/// A linear buffer that has a fixed capacity and a current size.
/// Samples that arrive once the bucket is full are dropped.
pub struct LinearBucket<T> {
    data: Vec<T>,
    length: usize,
}

impl<T> LinearBucket<T> {
    /// Resets it to being empty
    pub fn reset(&mut self) {
        self.length = 0;
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.length == self.capacity()
    }

    /// Returns immutable slice to valid data.
    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.length]
    }
}

impl<T: Default + Copy> LinearBucket<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            length: 0,
        }
    }

    /// Appends a single sample if there is space left.
    /// Returns whether the sample was stored.
    pub fn push(&mut self, value: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.data[self.length] = value;
        self.length += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity() {
        let mut bucket = LinearBucket::<u8>::new(3);
        assert!(bucket.push(1));
        assert!(bucket.push(2));
        assert!(bucket.push(3));
        assert!(!bucket.push(4));
        assert!(bucket.is_full());
        assert_eq!(bucket.as_slice(), &[1, 2, 3]);
        bucket.reset();
        assert_eq!(bucket.length(), 0);
        assert!(bucket.as_slice().is_empty());
    }
}
