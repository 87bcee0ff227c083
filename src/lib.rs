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

//! Embedded columnar database for ETL-style workloads.
//!
//! Records belong to a schema-defined table. Each table declares one or more
//! indexes and the engine materializes the table independently under every
//! index as a directory tree of gzip-compressed tab-separated packets. A
//! packet is the smallest unit of read, write and locking.

mod bookmark;
mod codec;
mod db;
mod error;
mod filename;
mod filter;
mod index;
mod lock;
mod options;
mod packet;
mod plan;
mod query;
mod schema;
mod transaction;
mod value;
mod walk;

pub use bookmark::Bookmark;
pub use db::Db;
pub use error::{Error, Result};
pub use filter::{IndexFilter, PathFilter};
pub use index::IndexDef;
pub use options::Options;
pub use plan::{Direction, IndexPriority};
pub use query::{Cursor, Query};
pub use schema::{Column, Record, Schema};
pub use transaction::Transaction;
pub use value::{ColumnType, Value};
