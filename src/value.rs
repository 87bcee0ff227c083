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

use std::cmp::Ordering;

/// Declared type of a column. Drives parsing from the column string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
	Integer,
	Float,
	Text,
}

impl ColumnType {
	/// Parse a non-null column string. `None` means the string does not
	/// belong to this column type.
	pub fn parse(&self, s: &str) -> Option<Value> {
		match self {
			ColumnType::Integer => s.parse::<i64>().ok().map(Value::Int),
			ColumnType::Float => s.parse::<f64>().ok().map(Value::Float),
			ColumnType::Text => Some(Value::Text(s.to_string())),
		}
	}
}

/// A single column value. All variants are totally ordered; `Null` sorts
/// before every non-null value.
#[derive(Debug, Clone)]
pub enum Value {
	Null,
	Int(i64),
	Float(f64),
	Text(String),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// The column string form of a non-null value. Null is rendered by the
	/// schema, which owns the null sentinel.
	pub(crate) fn render(&self) -> String {
		match self {
			Value::Null => String::new(),
			Value::Int(i) => i.to_string(),
			Value::Float(f) => f.to_string(),
			Value::Text(s) => s.clone(),
		}
	}

	fn type_rank(&self) -> u8 {
		match self {
			Value::Null => 0,
			// Int and Float share a rank and compare numerically.
			Value::Int(_) | Value::Float(_) => 1,
			Value::Text(_) => 2,
		}
	}
}

impl Ord for Value {
	fn cmp(&self, other: &Value) -> Ordering {
		use Value::*;
		match (self, other) {
			(Null, Null) => Ordering::Equal,
			(Null, _) => Ordering::Less,
			(_, Null) => Ordering::Greater,
			(Int(a), Int(b)) => a.cmp(b),
			(Float(a), Float(b)) => a.total_cmp(b),
			(Int(a), Float(b)) => (*a as f64).total_cmp(b),
			(Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
			(Text(a), Text(b)) => a.cmp(b),
			(a, b) => a.type_rank().cmp(&b.type_rank()),
		}
	}
}

impl PartialOrd for Value {
	fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Value) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Value {}
