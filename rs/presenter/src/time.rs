use std::time::Duration;

/// A presentation time or a time delta, in microseconds.
///
/// Unlike [Duration] this is signed: clock deltas are negative for late frames
/// and the presentation clock runs backwards during reverse playback.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time(i64);

impl Time {
	pub const ZERO: Self = Self(0);
	pub const MAX: Self = Self(i64::MAX);

	pub const fn from_micros(micros: i64) -> Self {
		Self(micros)
	}

	pub const fn from_millis(millis: i64) -> Self {
		Self(millis.saturating_mul(1000))
	}

	pub const fn from_secs(seconds: i64) -> Self {
		Self(seconds.saturating_mul(1_000_000))
	}

	pub fn from_secs_f64(seconds: f64) -> Self {
		Self((seconds * 1_000_000.0) as i64)
	}

	/// Convert a value and timescale to a time.
	///
	/// ex. from_timescale(1001, 30000) = 33366µs
	pub const fn from_timescale(value: i64, timescale: u64) -> Self {
		if timescale == 0 {
			return Self::ZERO;
		}
		Self((value as i128 * 1_000_000 / timescale as i128) as i64)
	}

	pub const fn as_micros(self) -> i64 {
		self.0
	}

	/// Truncates towards zero.
	pub const fn as_millis(self) -> i64 {
		self.0 / 1000
	}

	pub fn as_secs_f64(self) -> f64 {
		self.0 as f64 / 1_000_000.0
	}

	pub const fn is_negative(self) -> bool {
		self.0 < 0
	}

	pub const fn abs(self) -> Self {
		Self(self.0.saturating_abs())
	}

	pub fn checked_add(self, rhs: Self) -> Option<Self> {
		self.0.checked_add(rhs.0).map(Self)
	}

	pub fn checked_sub(self, rhs: Self) -> Option<Self> {
		self.0.checked_sub(rhs.0).map(Self)
	}

	/// Convert to a [Duration], clamping negative values to zero.
	pub fn to_duration(self) -> Duration {
		Duration::from_micros(self.0.max(0) as u64)
	}
}

impl From<Duration> for Time {
	fn from(duration: Duration) -> Self {
		Self(duration.as_micros().min(i64::MAX as u128) as i64)
	}
}

impl std::fmt::Debug for Time {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}µs", self.0)
	}
}

impl std::fmt::Display for Time {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}µs", self.0)
	}
}

impl std::ops::Add for Time {
	type Output = Self;

	fn add(self, rhs: Self) -> Self {
		Self(self.0.saturating_add(rhs.0))
	}
}

impl std::ops::AddAssign for Time {
	fn add_assign(&mut self, rhs: Self) {
		*self = *self + rhs;
	}
}

impl std::ops::Sub for Time {
	type Output = Self;

	fn sub(self, rhs: Self) -> Self {
		Self(self.0.saturating_sub(rhs.0))
	}
}

impl std::ops::SubAssign for Time {
	fn sub_assign(&mut self, rhs: Self) {
		*self = *self - rhs;
	}
}

impl std::ops::Neg for Time {
	type Output = Self;

	fn neg(self) -> Self {
		Self(self.0.saturating_neg())
	}
}

impl std::ops::Div<i64> for Time {
	type Output = Self;

	fn div(self, rhs: i64) -> Self {
		Self(self.0 / rhs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_units() {
		assert_eq!(Time::from_secs(2).as_micros(), 2_000_000);
		assert_eq!(Time::from_millis(40).as_micros(), 40_000);
		assert_eq!(Time::from_micros(1999).as_millis(), 1);
		assert_eq!(Time::from_micros(-1999).as_millis(), -1);
	}

	#[test]
	fn test_timescale() {
		assert_eq!(Time::from_timescale(1, 30), Time::from_micros(33_333));
		assert_eq!(Time::from_timescale(1001, 30000), Time::from_micros(33_366));
		assert_eq!(Time::from_timescale(5, 0), Time::ZERO);
	}

	#[test]
	fn test_signed_arithmetic() {
		let a = Time::from_millis(10);
		let b = Time::from_millis(25);
		assert_eq!(a - b, Time::from_millis(-15));
		assert!((a - b).is_negative());
		assert_eq!(-(a - b), Time::from_millis(15));
		assert_eq!((a - b).abs(), Time::from_millis(15));
	}

	#[test]
	fn test_duration() {
		assert_eq!(Time::from_millis(-5).to_duration(), Duration::ZERO);
		assert_eq!(Time::from_millis(5).to_duration(), Duration::from_millis(5));
		assert_eq!(Time::from(Duration::from_millis(7)), Time::from_millis(7));
	}

	#[test]
	fn test_display() {
		assert_eq!(Time::from_millis(3).to_string(), "3000µs");
	}
}
