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

use crate::{
	error::{Error, Result},
	index::IndexDef,
	value::{ColumnType, Value},
};

/// Separator between unique column values in the in-packet record key.
pub(crate) const UNIQUE_SEPARATOR: char = '\0';

#[derive(Debug)]
pub struct Column {
	pub name: &'static str,
	pub kind: ColumnType,
}

/// Static table descriptor. One per record type, validated on first use;
/// every other component assumes a validated schema.
#[derive(Debug)]
pub struct Schema {
	pub table: &'static str,
	pub columns: &'static [Column],
	/// Positions of the columns whose joined string form is the in-packet
	/// primary key.
	pub unique: &'static [usize],
	pub indexes: &'static [IndexDef],
	/// String written for a null column value.
	pub null_value: &'static str,
}

/// A storable record. `Default` must produce the all-null record; `get` and
/// `set` address columns by schema position.
pub trait Record: Clone + Default + Send + 'static {
	fn schema() -> &'static Schema;
	fn get(&self, column: usize) -> Value;
	fn set(&mut self, column: usize, value: Value);
}

impl Schema {
	pub fn validate(&self) -> Result<()> {
		if self.columns.is_empty() {
			return Err(Error::Schema(format!("table {} has no columns", self.table)));
		}
		for (i, column) in self.columns.iter().enumerate() {
			if column.name.is_empty() {
				return Err(Error::Schema(format!("table {} column {} has no name", self.table, i)));
			}
			if self.columns[..i].iter().any(|c| c.name == column.name) {
				return Err(Error::Schema(format!(
					"table {} has duplicate column {}",
					self.table, column.name
				)));
			}
		}
		if self.unique.is_empty() {
			return Err(Error::Schema(format!("table {} has no unique columns", self.table)));
		}
		for position in self.unique {
			if *position >= self.columns.len() {
				return Err(Error::Schema(format!(
					"table {} unique column {} does not exist",
					self.table, position
				)));
			}
		}
		if self.indexes.is_empty() {
			return Err(Error::Schema(format!("table {} declares no indexes", self.table)));
		}
		for (i, index) in self.indexes.iter().enumerate() {
			if index.columns.is_empty() {
				return Err(Error::Schema(format!(
					"table {} index {} has no columns",
					self.table, index.name
				)));
			}
			if self.indexes[..i].iter().any(|other| other.name == index.name) {
				return Err(Error::Schema(format!(
					"table {} has duplicate index {}",
					self.table, index.name
				)));
			}
			for position in index.columns {
				if *position >= self.columns.len() {
					return Err(Error::Schema(format!(
						"table {} index {} column {} does not exist",
						self.table, index.name, position
					)));
				}
				if index.columns.iter().filter(|c| *c == position).count() > 1 {
					return Err(Error::Schema(format!(
						"table {} index {} repeats column {}",
						self.table, index.name, self.columns[*position].name
					)));
				}
			}
		}
		Ok(())
	}

	pub fn column_position(&self, name: &str) -> Option<usize> {
		self.columns.iter().position(|c| c.name == name)
	}

	pub fn index_named(&self, name: &str) -> Option<&'static IndexDef> {
		// The descriptor itself is 'static; reborrow through it.
		self.indexes.iter().find(|i| i.name == name)
	}

	/// Column string form. Null renders as the schema's null sentinel.
	pub fn to_string(&self, _column: usize, value: &Value) -> String {
		if value.is_null() {
			self.null_value.to_string()
		} else {
			value.render()
		}
	}

	/// Parse a column string. The null sentinel parses as `Null`; `None`
	/// means the string does not fit the column type.
	pub fn from_string(&self, column: usize, s: &str) -> Option<Value> {
		if s == self.null_value {
			return Some(Value::Null);
		}
		self.columns[column].kind.parse(s)
	}

	/// The in-packet primary key of a record.
	pub fn unique_key<R: Record>(&self, record: &R) -> String {
		let mut key = String::new();
		for (i, position) in self.unique.iter().enumerate() {
			if i > 0 {
				key.push(UNIQUE_SEPARATOR);
			}
			key.push_str(&self.to_string(*position, &record.get(*position)));
		}
		key
	}

	/// String forms of the record's values along the given index's columns.
	pub fn index_path<R: Record>(&self, record: &R, index: &IndexDef) -> Vec<String> {
		index
			.columns
			.iter()
			.map(|position| self.to_string(*position, &record.get(*position)))
			.collect()
	}

	/// Single-string form of an index path, for keying plan maps.
	pub fn path_key(path: &[String]) -> String {
		path.join("\0")
	}
}


#[cfg(test)]
mod test {
	use super::fixture::{metric, Metric, ACCOUNT, METRIC_SCHEMA};
	use super::{Column, Record, Schema};
	use crate::index::IndexDef;
	use crate::value::{ColumnType, Value};

	#[test]
	fn fixture_schema_is_valid() {
		METRIC_SCHEMA.validate().unwrap();
	}

	#[test]
	fn rejects_duplicate_column() {
		static BAD: Schema = Schema {
			table: "bad",
			columns: &[
				Column { name: "a", kind: ColumnType::Text },
				Column { name: "a", kind: ColumnType::Text },
			],
			unique: &[0],
			indexes: &[IndexDef { name: "i", columns: &[1] }],
			null_value: "",
		};
		assert!(BAD.validate().is_err());
	}

	#[test]
	fn rejects_missing_indexes() {
		static BAD: Schema = Schema {
			table: "bad",
			columns: &[Column { name: "a", kind: ColumnType::Text }],
			unique: &[0],
			indexes: &[],
			null_value: "",
		};
		assert!(BAD.validate().is_err());
	}

	#[test]
	fn rejects_unknown_index_column() {
		static BAD: Schema = Schema {
			table: "bad",
			columns: &[Column { name: "a", kind: ColumnType::Text }],
			unique: &[0],
			indexes: &[IndexDef { name: "i", columns: &[7] }],
			null_value: "",
		};
		assert!(BAD.validate().is_err());
	}

	#[test]
	fn unique_key_joins_with_separator() {
		let record = metric("2020-01-02", "a11", "ad1", 100);
		assert_eq!(METRIC_SCHEMA.unique_key(&record), "ad1\02020-01-02");
	}

	#[test]
	fn index_path_follows_declaration() {
		let record = metric("2020-01-02", "a11", "ad1", 100);
		let index = METRIC_SCHEMA.index_named("account_date").unwrap();
		assert_eq!(METRIC_SCHEMA.index_path(&record, index), vec!["a11", "2020-01-02"]);
	}

	#[test]
	fn null_round_trips_through_sentinel() {
		let record = Metric::default();
		assert_eq!(METRIC_SCHEMA.to_string(ACCOUNT, &record.get(ACCOUNT)), "");
		assert_eq!(METRIC_SCHEMA.from_string(ACCOUNT, "").unwrap(), Value::Null);
	}
}
