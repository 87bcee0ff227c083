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

use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
	/// Invalid schema declaration. Raised on first use of a record type.
	Schema(String),
	/// Filesystem failure. `phase` names the operation that failed.
	Io { path: PathBuf, phase: &'static str, source: std::io::Error },
	/// Unreadable packet or file name. `line` is 1-based when row-level.
	Corruption { path: PathBuf, line: Option<u64>, msg: String },
	/// An update hook or updater changed indexed columns.
	IllegalUpdate { table: &'static str, msg: String },
	/// The requested sort cannot be produced by any path through the
	/// chosen index.
	InfeasibleSort { requested: Vec<String>, admissible: Vec<Vec<String>> },
	/// Bookmark failed to decode, or points at data that no longer exists.
	InvalidBookmark(String),
	/// Work was skipped because an earlier worker in the same transaction
	/// failed.
	Aborted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
	pub(crate) fn io(phase: &'static str, path: &std::path::Path, source: std::io::Error) -> Error {
		let path = std::path::absolute(path).unwrap_or_else(|_| path.into());
		Error::Io { path, phase, source }
	}

	pub(crate) fn corruption(path: &std::path::Path, line: Option<u64>, msg: String) -> Error {
		Error::Corruption { path: path.into(), line, msg }
	}
}

impl From<std::io::Error> for Error {
	fn from(source: std::io::Error) -> Error {
		Error::Io { path: PathBuf::new(), phase: "io", source }
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::Schema(msg) => write!(f, "Invalid schema: {}", msg),
			Error::Io { path, phase, source } =>
				write!(f, "IO error during {} of {:?}: {}", phase, path, source),
			Error::Corruption { path, line: Some(line), msg } =>
				write!(f, "Corrupted data in {:?} at line {}: {}", path, line, msg),
			Error::Corruption { path, line: None, msg } =>
				write!(f, "Corrupted data in {:?}: {}", path, msg),
			Error::IllegalUpdate { table, msg } =>
				write!(f, "Illegal update on table {}: {}", table, msg),
			Error::InfeasibleSort { requested, admissible } => {
				write!(f, "Sort ({}) cannot be satisfied by any index; ", requested.join(", "))?;
				write!(f, "admissible sort prefixes: ")?;
				for (i, prefix) in admissible.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "({})", prefix.join(", "))?;
				}
				write!(f, "; an index hint overrides the selection")
			}
			Error::InvalidBookmark(msg) => write!(f, "Invalid bookmark: {}", msg),
			Error::Aborted => write!(f, "Aborted by an earlier failure in the same transaction"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io { source, .. } => Some(source),
			_ => None,
		}
	}
}
