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

/// Database configuration. All fields have working defaults; a zero-config
/// open is `Db::open(&Options::default())`.
#[derive(Debug, Clone)]
pub struct Options {
	/// Root directory for all tables.
	pub path: PathBuf,
	/// When set, packet writes go through a temporary file and an atomic
	/// rename. When unset, packets are overwritten in place.
	pub durable_writes: bool,
	/// Worker pool size for transaction commits.
	pub transaction_parallelism: usize,
	/// Number of in-flight packet loads per query.
	pub query_parallelism: usize,
}

impl Options {
	pub fn with_path(path: impl Into<PathBuf>) -> Options {
		Options { path: path.into(), ..Default::default() }
	}
}

impl Default for Options {
	fn default() -> Options {
		Options {
			path: PathBuf::from("./var/data"),
			durable_writes: false,
			transaction_parallelism: 4,
			query_parallelism: 4,
		}
	}
}
