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

/// One partitioning of a table: an ordered list of column positions. Each
/// index materializes the full table under its own directory tree.
#[derive(Debug, PartialEq, Eq)]
pub struct IndexDef {
	pub name: &'static str,
	pub columns: &'static [usize],
}

impl IndexDef {
	pub fn contains(&self, column: usize) -> bool {
		self.columns.contains(&column)
	}

	/// Directory depth of the column within this index's tree.
	pub fn level_of(&self, column: usize) -> Option<usize> {
		self.columns.iter().position(|c| *c == column)
	}
}

impl std::fmt::Display for IndexDef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "index {}", self.name)
	}
}
