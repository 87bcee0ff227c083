// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

use regex::Regex;

use crate::value::Value;

/// Per-column predicate. Used to prune directory traversal when its column
/// is part of the chosen index, and to filter records per packet otherwise.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
	equals: Option<Value>,
	min: Option<Value>,
	max: Option<Value>,
	patterns: Vec<Regex>,
}

impl PathFilter {
	/// Exactly one accepted value. The value may be null.
	pub fn exact(value: Value) -> PathFilter {
		PathFilter { equals: Some(value), ..Default::default() }
	}

	/// Interval filter; a `None` endpoint keeps that side open. Equal
	/// endpoints degrade to an exact filter.
	pub fn range(min: Option<Value>, max: Option<Value>) -> PathFilter {
		match (min, max) {
			(Some(lo), Some(hi)) if lo == hi => PathFilter::exact(lo),
			(min, max) => PathFilter { min, max, ..Default::default() },
		}
	}

	pub fn at_least(value: Value) -> PathFilter {
		PathFilter::range(Some(value), None)
	}

	pub fn at_most(value: Value) -> PathFilter {
		PathFilter::range(None, Some(value))
	}

	/// Add a pattern over the column's string form. All patterns must match.
	pub fn pattern(mut self, regex: Regex) -> PathFilter {
		self.patterns.push(regex);
		self
	}

	/// True iff the filter reduces to exactly one accepted value.
	pub fn is_strict(&self) -> bool {
		self.equals.is_some()
	}

	pub fn strict_value(&self) -> Option<&Value> {
		self.equals.as_ref()
	}

	/// Evaluate against a value and its string form.
	pub fn matches(&self, value: &Value, text: &str) -> bool {
		if let Some(expected) = &self.equals {
			if value != expected {
				return false;
			}
		}
		if let Some(min) = &self.min {
			if value < min {
				return false;
			}
		}
		if let Some(max) = &self.max {
			if value > max {
				return false;
			}
		}
		self.patterns.iter().all(|p| p.is_match(text))
	}
}

impl std::fmt::Display for PathFilter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut wrote = false;
		if let Some(v) = &self.equals {
			write!(f, "= {:?}", v)?;
			wrote = true;
		}
		if let Some(v) = &self.min {
			write!(f, "{}>= {:?}", if wrote { " " } else { "" }, v)?;
			wrote = true;
		}
		if let Some(v) = &self.max {
			write!(f, "{}<= {:?}", if wrote { " " } else { "" }, v)?;
			wrote = true;
		}
		for pattern in &self.patterns {
			write!(f, "{}~ /{}/", if wrote { " " } else { "" }, pattern)?;
			wrote = true;
		}
		if !wrote {
			write!(f, "any")?;
		}
		Ok(())
	}
}

/// Wire-level predicate used by the directory walker to restrict a level to
/// a range of entries. `After`/`Before` are inclusive and flip under
/// descending traversal.
#[derive(Debug, Clone)]
pub enum IndexFilter {
	Equals(Value),
	After(Value),
	Before(Value),
	Between(Value, Value),
}

impl IndexFilter {
	pub fn intersects(&self, value: &Value, invert_order: bool) -> bool {
		match self {
			IndexFilter::Equals(expected) => value == expected,
			IndexFilter::After(bound) => {
				if invert_order {
					value <= bound
				} else {
					value >= bound
				}
			}
			IndexFilter::Before(bound) => {
				if invert_order {
					value >= bound
				} else {
					value <= bound
				}
			}
			IndexFilter::Between(lo, hi) => value >= lo && value <= hi,
		}
	}
}

#[cfg(test)]
mod test {
	use super::{IndexFilter, PathFilter};
	use crate::value::Value;
	use regex::Regex;

	fn int(i: i64) -> Value {
		Value::Int(i)
	}

	#[test]
	fn exact_is_strict() {
		let filter = PathFilter::exact(Value::Text("a11".into()));
		assert!(filter.is_strict());
		assert_eq!(filter.strict_value(), Some(&Value::Text("a11".into())));
		assert!(filter.matches(&Value::Text("a11".into()), "a11"));
		assert!(!filter.matches(&Value::Text("a12".into()), "a12"));
	}

	#[test]
	fn exact_null_matches_null() {
		let filter = PathFilter::exact(Value::Null);
		assert!(filter.matches(&Value::Null, ""));
		assert!(!filter.matches(&int(0), "0"));
	}

	#[test]
	fn range_half_open() {
		let filter = PathFilter::at_least(int(10));
		assert!(!filter.is_strict());
		assert!(filter.matches(&int(10), "10"));
		assert!(filter.matches(&int(999), "999"));
		assert!(!filter.matches(&int(9), "9"));
		// Null falls below every bound.
		assert!(!filter.matches(&Value::Null, ""));

		let filter = PathFilter::at_most(int(10));
		assert!(filter.matches(&int(10), "10"));
		assert!(!filter.matches(&int(11), "11"));
	}

	#[test]
	fn collapsed_range_degrades_to_exact() {
		let filter = PathFilter::range(Some(int(5)), Some(int(5)));
		assert!(filter.is_strict());
		assert_eq!(filter.strict_value(), Some(&int(5)));
	}

	#[test]
	fn patterns_all_must_match() {
		let filter = PathFilter::range(None, None)
			.pattern(Regex::new("^a").unwrap())
			.pattern(Regex::new("1$").unwrap());
		assert!(filter.matches(&Value::Text("a11".into()), "a11"));
		assert!(!filter.matches(&Value::Text("a12".into()), "a12"));
		assert!(!filter.matches(&Value::Text("b11".into()), "b11"));
	}

	#[test]
	fn index_filter_inverts_with_order() {
		let after = IndexFilter::After(int(5));
		assert!(after.intersects(&int(5), false));
		assert!(after.intersects(&int(6), false));
		assert!(!after.intersects(&int(4), false));
		assert!(after.intersects(&int(4), true));
		assert!(!after.intersects(&int(6), true));

		let between = IndexFilter::Between(int(2), int(4));
		assert!(between.intersects(&int(3), false));
		assert!(between.intersects(&int(3), true));
		assert!(!between.intersects(&int(5), true));
	}
}
