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

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::{
	error::{Error, Result},
	index::IndexDef,
	schema::Record,
};

/// One continuation point: the index path plus unique key of the last
/// record served, recorded as column name to string value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Fragment {
	pub table: String,
	pub index: String,
	pub path: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
	fragments: Vec<Fragment>,
}

/// Opaque paging cursor. Produced by a cursor after serving records and
/// consumed by a later run of the same query to resume after the last
/// record served.
#[derive(Debug, Clone)]
pub struct Bookmark {
	fragments: Vec<Fragment>,
}

impl Bookmark {
	pub(crate) fn from_record<R: Record>(record: &R, index: &IndexDef) -> Bookmark {
		let schema = R::schema();
		let mut path = BTreeMap::new();
		for position in index.columns.iter().chain(schema.unique.iter()) {
			path.insert(
				schema.columns[*position].name.to_string(),
				schema.to_string(*position, &record.get(*position)),
			);
		}
		let fragment = Fragment {
			table: schema.table.to_string(),
			index: index.name.to_string(),
			path,
		};
		Bookmark { fragments: vec![fragment] }
	}

	pub(crate) fn fragment_for(&self, table: &str, index: &str) -> Option<&Fragment> {
		self.fragments.iter().find(|f| f.table == table && f.index == index)
	}

	pub fn encode(&self) -> String {
		let document = Document { fragments: self.fragments.clone() };
		// Serialization of plain maps and strings cannot fail.
		let json = serde_json::to_vec(&document).unwrap_or_default();
		STANDARD.encode(json)
	}

	/// Any failure decodes to `InvalidBookmark`, never a lower-level parse
	/// error.
	pub fn decode(encoded: &str) -> Result<Bookmark> {
		let bytes = STANDARD
			.decode(encoded.trim())
			.map_err(|_| Error::InvalidBookmark("not a base64 document".into()))?;
		let document: Document = serde_json::from_slice(&bytes)
			.map_err(|_| Error::InvalidBookmark("unreadable bookmark document".into()))?;
		if document.fragments.is_empty() {
			return Err(Error::InvalidBookmark("bookmark has no fragments".into()));
		}
		Ok(Bookmark { fragments: document.fragments })
	}
}
