use std::num::NonZeroU32;

use crate::Error;

/// A positive handle given to C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(NonZeroU32);

impl TryFrom<i32> for Id {
	type Error = Error;

	fn try_from(id: i32) -> Result<Self, Error> {
		let id = u32::try_from(id).map_err(|_| Error::InvalidId)?;
		NonZeroU32::new(id).map(Self).ok_or(Error::InvalidId)
	}
}

impl TryFrom<Id> for i32 {
	type Error = Error;

	fn try_from(id: Id) -> Result<Self, Error> {
		i32::try_from(id.0.get()).map_err(|_| Error::InvalidCode)
	}
}

/// A [slab::Slab] whose keys start at one, so zero is never a valid [Id].
pub struct NonZeroSlab<T>(slab::Slab<T>);

impl<T> Default for NonZeroSlab<T> {
	fn default() -> Self {
		Self(slab::Slab::new())
	}
}

impl<T> NonZeroSlab<T> {
	pub fn insert(&mut self, value: T) -> Result<Id, Error> {
		let entry = self.0.vacant_entry();
		let id = u32::try_from(entry.key() + 1).map_err(|_| Error::InvalidId)?;
		let id = NonZeroU32::new(id).ok_or(Error::InvalidId)?;

		// Reject ids that would not fit in an i32 before taking the slot.
		i32::try_from(Id(id))?;

		entry.insert(value);
		Ok(Id(id))
	}

	pub fn get(&self, id: Id) -> Option<&T> {
		self.0.get(Self::key(id))
	}

	pub fn remove(&mut self, id: Id) -> Option<T> {
		self.0.try_remove(Self::key(id))
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	fn key(id: Id) -> usize {
		id.0.get() as usize - 1
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_id() {
		assert!(matches!(Id::try_from(0), Err(Error::InvalidId)));
		assert!(matches!(Id::try_from(-3), Err(Error::InvalidId)));
		assert_eq!(i32::try_from(Id::try_from(7).unwrap()).unwrap(), 7);
	}

	#[test]
	fn test_slab_starts_at_one() {
		let mut slab = NonZeroSlab::default();
		let a = slab.insert("a").unwrap();
		let b = slab.insert("b").unwrap();

		assert_eq!(i32::try_from(a).unwrap(), 1);
		assert_eq!(i32::try_from(b).unwrap(), 2);
		assert_eq!(slab.get(b), Some(&"b"));

		assert_eq!(slab.remove(a), Some("a"));
		assert_eq!(slab.remove(a), None);
		assert_eq!(slab.len(), 1);

		// Freed slots are reused.
		assert_eq!(slab.insert("c").unwrap(), a);
	}
}
