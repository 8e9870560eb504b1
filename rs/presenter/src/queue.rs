use std::collections::VecDeque;

use parking_lot::Mutex;

/// A FIFO shared between threads, with reinsertion at the front.
///
/// Each operation takes the lock briefly; nothing blocks waiting for items.
pub struct SampleQueue<T> {
	items: Mutex<VecDeque<T>>,
}

impl<T> SampleQueue<T> {
	pub fn new() -> Self {
		Self {
			items: Mutex::new(VecDeque::new()),
		}
	}

	pub fn push_back(&self, item: T) {
		self.items.lock().push_back(item);
	}

	/// Put an item back so it is the next one popped.
	pub fn put_back(&self, item: T) {
		self.items.lock().push_front(item);
	}

	pub fn pop_front(&self) -> Option<T> {
		self.items.lock().pop_front()
	}

	pub fn is_empty(&self) -> bool {
		self.items.lock().is_empty()
	}

	pub fn len(&self) -> usize {
		self.items.lock().len()
	}

	/// Remove every item, returning them in order.
	pub fn drain(&self) -> Vec<T> {
		self.items.lock().drain(..).collect()
	}
}

impl<T> Default for SampleQueue<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fifo() {
		let queue = SampleQueue::new();
		assert!(queue.is_empty());

		queue.push_back(1);
		queue.push_back(2);
		assert!(!queue.is_empty());
		assert_eq!(queue.len(), 2);

		assert_eq!(queue.pop_front(), Some(1));
		assert_eq!(queue.pop_front(), Some(2));
		assert_eq!(queue.pop_front(), None);
		assert!(queue.is_empty());
	}

	#[test]
	fn test_put_back() {
		let queue = SampleQueue::new();
		queue.push_back(2);
		queue.push_back(3);

		let first = queue.pop_front().unwrap();
		queue.put_back(first);
		queue.put_back(1);

		assert_eq!(queue.drain(), vec![1, 2, 3]);
		assert!(queue.is_empty());
	}
}
