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

use std::path::Path;

use fs2::FileExt;

use crate::{
	error::{Error, Result},
	options::Options,
	query::Query,
	schema::Record,
	transaction::Transaction,
};

/// An open database directory. There is no catalog file; the directory
/// tree under the root is the whole state. The root is held under an
/// exclusive advisory lock for the lifetime of this value.
pub struct Db {
	options: Options,
	_lock: std::fs::File,
}

impl Db {
	pub fn open(options: &Options) -> Result<Db> {
		std::fs::create_dir_all(&options.path)
			.map_err(|e| Error::io("create-dir", &options.path, e))?;
		let lock_path = options.path.join("lock");
		let lock = std::fs::OpenOptions::new()
			.create(true)
			.truncate(true)
			.write(true)
			.open(&lock_path)
			.map_err(|e| Error::io("write", &lock_path, e))?;
		lock.try_lock_exclusive().map_err(|e| Error::io("lock", &lock_path, e))?;
		log::info!(target: "packet-db", "Opened database at {:?}", options.path);
		Ok(Db { options: options.clone(), _lock: lock })
	}

	pub fn options(&self) -> &Options {
		&self.options
	}

	pub(crate) fn root(&self) -> &Path {
		&self.options.path
	}

	/// Start a write batch for a record type.
	pub fn transaction<R: Record>(&self) -> Result<Transaction<'_, R>> {
		R::schema().validate()?;
		Ok(Transaction::new(self))
	}

	/// Start assembling a query for a record type.
	pub fn query<R: Record>(&self) -> Result<Query<'_, R>> {
		R::schema().validate()?;
		Ok(Query::new(self))
	}
}
