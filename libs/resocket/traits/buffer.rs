use std::collections::VecDeque;

/// Trait for staging outbound messages while disconnected
///
/// The connection only adds to a buffer while its transport is not open,
/// and drains it completely (calling `read` until it returns `None`) right
/// after the next `open` event. Capacity limits and eviction are the
/// buffer's business.
pub trait Buffer<T>: Send {
    /// Stage an element
    fn add(&mut self, element: T);

    /// Remove and return the next element, or `None` when empty
    fn read(&mut self) -> Option<T>;

    /// Number of staged elements
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every staged element
    fn clear(&mut self) {
        while self.read().is_some() {}
    }
}

/// Unbounded FIFO buffer
#[derive(Debug, Clone)]
pub struct ArrayQueue<T> {
    elements: VecDeque<T>,
}

impl<T> ArrayQueue<T> {
    pub fn new() -> Self {
        Self {
            elements: VecDeque::new(),
        }
    }
}

impl<T> Default for ArrayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Buffer<T> for ArrayQueue<T> {
    fn add(&mut self, element: T) {
        self.elements.push_back(element);
    }

    fn read(&mut self) -> Option<T> {
        self.elements.pop_front()
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn clear(&mut self) {
        self.elements.clear();
    }
}

/// Bounded FIFO buffer
///
/// When full, adding an element evicts the oldest one. A ring queue with
/// capacity 0 stores nothing.
#[derive(Debug, Clone)]
pub struct RingQueue<T> {
    capacity: usize,
    elements: VecDeque<T>,
}

impl<T> RingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            elements: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Send> Buffer<T> for RingQueue<T> {
    fn add(&mut self, element: T) {
        if self.capacity == 0 {
            return;
        }
        if self.elements.len() == self.capacity {
            self.elements.pop_front();
        }
        self.elements.push_back(element);
    }

    fn read(&mut self) -> Option<T> {
        self.elements.pop_front()
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn clear(&mut self) {
        self.elements.clear();
    }
}
