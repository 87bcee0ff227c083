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

// One packet file: all records of a table that share an index path.
//
// <root>/<table>/<index>/<enc(v0)>/…/<enc(vL-1)>.tsv.gz
//
// The first decoded row is the header. The header is mapped against the
// current schema per packet, so packets written under an older column set
// stay readable: missing columns decode as null, unknown columns are
// dropped. Writers always emit the current schema's column order.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{
	codec,
	error::{Error, Result},
	filename,
	filter::PathFilter,
	index::IndexDef,
	plan::{Direction, FlexFilter},
	schema::Record,
	value::Value,
};

pub(crate) const PACKET_EXT: &str = ".tsv.gz";

/// Filters and sort directives not absorbed by the index path, applied
/// while decoding.
pub(crate) struct DecodeFilter<'a, R> {
	pub free_path: &'a [(usize, PathFilter)],
	pub flex: &'a [FlexFilter<R>],
	pub free_sort: &'a [(usize, Direction)],
}

pub(crate) struct Packet<R: Record> {
	index: &'static IndexDef,
	path_values: Vec<String>,
	file: PathBuf,
	raw: Option<Vec<u8>>,
	records: BTreeMap<String, R>,
}

impl<R: Record> Packet<R> {
	/// Resolve the packet location. No I/O.
	pub fn new(root: &Path, index: &'static IndexDef, path_values: Vec<String>) -> Packet<R> {
		debug_assert_eq!(path_values.len(), index.columns.len());
		let schema = R::schema();
		let mut file = root.join(schema.table).join(index.name);
		let last = path_values.len() - 1;
		for (i, value) in path_values.iter().enumerate() {
			let mut component = filename::encode(value);
			if i == last {
				component.push_str(PACKET_EXT);
			}
			file.push(component);
		}
		Packet { index, path_values, file, raw: None, records: BTreeMap::new() }
	}

	pub fn file(&self) -> &Path {
		&self.file
	}

	pub fn path_values(&self) -> &[String] {
		&self.path_values
	}

	/// Read the compressed buffer. A missing file is an empty packet, not
	/// an error. Must run under the packet's lock.
	pub fn load(&mut self) -> Result<()> {
		match std::fs::read(&self.file) {
			Ok(bytes) => {
				log::trace!(target: "packet-db", "{}: Loaded {} bytes from {:?}", self.index, bytes.len(), self.file);
				self.raw = Some(bytes);
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				self.raw = None;
				Ok(())
			}
			Err(e) => Err(Error::io("read", &self.file, e)),
		}
	}

	/// Parse the loaded buffer into the record map, returning the records
	/// that pass the filters, sorted by the free sort directives. Runs
	/// off-lock.
	pub fn decode(&mut self, filter: Option<&DecodeFilter<'_, R>>) -> Result<Vec<R>> {
		self.records.clear();
		let raw = match &self.raw {
			Some(raw) => raw,
			None => return Ok(Vec::new()),
		};
		let schema = R::schema();
		let text = codec::decompress(raw)
			.map_err(|e| Error::corruption(&self.file, None, format!("bad compressed stream: {}", e)))?;

		let mut lines = text.lines();
		let header = match lines.next() {
			Some(header) => header,
			None => return Err(Error::corruption(&self.file, Some(1), "missing header row".into())),
		};
		let header = codec::split_row(header)
			.ok_or_else(|| Error::corruption(&self.file, Some(1), "malformed header row".into()))?;
		// Unknown file columns map to None and are dropped.
		let file_to_schema: Vec<Option<usize>> =
			header.iter().map(|name| schema.column_position(name)).collect();
		let mut schema_to_file = vec![None; schema.columns.len()];
		for (file_position, schema_position) in file_to_schema.iter().enumerate() {
			if let Some(schema_position) = *schema_position {
				schema_to_file[schema_position] = Some(file_position);
			}
		}

		let mut result = Vec::new();
		'row: for (index, line) in lines.enumerate() {
			let line_number = index as u64 + 2;
			let fields = codec::split_row(line)
				.ok_or_else(|| Error::corruption(&self.file, Some(line_number), "malformed row".into()))?;
			if fields.len() != header.len() {
				return Err(Error::corruption(
					&self.file,
					Some(line_number),
					format!("row has {} columns, header has {}", fields.len(), header.len()),
				));
			}

			if let Some(filter) = filter {
				for (column, path_filter) in filter.free_path {
					let (value, text) = match schema_to_file[*column] {
						Some(position) => {
							let field = fields[position].as_str();
							let value = schema.from_string(*column, field).ok_or_else(|| {
								Error::corruption(
									&self.file,
									Some(line_number),
									format!("unreadable {} value {:?}", schema.columns[*column].name, field),
								)
							})?;
							(value, field)
						}
						None => (Value::Null, schema.null_value),
					};
					if !path_filter.matches(&value, text) {
						continue 'row;
					}
				}
			}

			let mut record = R::default();
			for (file_position, schema_position) in file_to_schema.iter().enumerate() {
				let schema_position = match schema_position {
					Some(position) => *position,
					None => continue,
				};
				let field = fields[file_position].as_str();
				let value = schema.from_string(schema_position, field).ok_or_else(|| {
					Error::corruption(
						&self.file,
						Some(line_number),
						format!("unreadable {} value {:?}", schema.columns[schema_position].name, field),
					)
				})?;
				if !value.is_null() {
					record.set(schema_position, value);
				}
			}

			if let Some(filter) = filter {
				if !filter.flex.iter().all(|f| f(&record)) {
					continue 'row;
				}
			}

			self.records.insert(schema.unique_key(&record), record.clone());
			result.push(record);
		}

		if let Some(filter) = filter {
			if !filter.free_sort.is_empty() {
				result.sort_by(|a, b| {
					for (column, direction) in filter.free_sort {
						let ordering = a.get(*column).cmp(&b.get(*column));
						let ordering = match direction {
							Direction::Asc => ordering,
							Direction::Desc => ordering.reverse(),
						};
						if ordering != std::cmp::Ordering::Equal {
							return ordering;
						}
					}
					std::cmp::Ordering::Equal
				});
			}
		}
		Ok(result)
	}

	pub fn get(&self, unique: &str) -> Option<&R> {
		self.records.get(unique)
	}

	pub fn set(&mut self, unique: String, record: R) {
		self.records.insert(unique, record);
	}

	pub fn remove(&mut self, unique: &str) -> Option<R> {
		self.records.remove(unique)
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn records(&self) -> impl Iterator<Item = (&String, &R)> {
		self.records.iter()
	}

	/// Rebuild the compressed buffer from the record map. Column order is
	/// the schema's declared order.
	pub fn encode(&mut self) -> Result<()> {
		let schema = R::schema();
		let mut text = codec::join_row(schema.columns.iter().map(|c| c.name));
		text.push('\n');
		for record in self.records.values() {
			let fields: Vec<String> = (0..schema.columns.len())
				.map(|column| schema.to_string(column, &record.get(column)))
				.collect();
			text.push_str(&codec::join_row(fields.iter().map(|f| f.as_str())));
			text.push('\n');
		}
		self.raw =
			Some(codec::compress(&text).map_err(|e| Error::io("compress", &self.file, e))?);
		Ok(())
	}

	/// Write the packet durably. An empty packet is unlinked instead. Must
	/// run under the packet's lock.
	pub fn save(&mut self, durable: bool) -> Result<()> {
		if self.records.is_empty() {
			match std::fs::remove_file(&self.file) {
				Ok(()) => {
					log::debug!(target: "packet-db", "{}: Unlinked empty packet {:?}", self.index, self.file)
				}
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
				Err(e) => return Err(Error::io("delete", &self.file, e)),
			}
			return Ok(());
		}
		self.encode()?;
		let raw = self.raw.as_ref().ok_or_else(|| {
			Error::corruption(&self.file, None, "packet has no encoded buffer".into())
		})?;
		if let Some(parent) = self.file.parent() {
			std::fs::create_dir_all(parent).map_err(|e| Error::io("create-dir", parent, e))?;
		}

		if !durable {
			write_synced(&self.file, raw)?;
		} else {
			let mut tmp = self.file.clone().into_os_string();
			tmp.push(".tmp");
			let tmp = PathBuf::from(tmp);
			write_synced(&tmp, raw)?;
			// Data is durable in the temporary file from here on; failures
			// below must name both paths so an operator can finish the swap.
			match std::fs::remove_file(&self.file) {
				Ok(()) => (),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
				Err(e) => return Err(Error::io("delete", &self.file, recovery_error(&tmp, &self.file, e))),
			}
			std::fs::rename(&tmp, &self.file)
				.map_err(|e| Error::io("rename", &tmp, recovery_error(&tmp, &self.file, e)))?;
		}
		log::debug!(
			target: "packet-db",
			"{}: Saved {} records to {:?}",
			self.index,
			self.records.len(),
			self.file,
		);
		Ok(())
	}
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
	let mut file = std::fs::File::create(path).map_err(|e| Error::io("write", path, e))?;
	file.write_all(bytes).map_err(|e| Error::io("write", path, e))?;
	file.sync_data().map_err(|e| Error::io("write", path, e))?;
	Ok(())
}

fn recovery_error(tmp: &Path, file: &Path, e: std::io::Error) -> std::io::Error {
	std::io::Error::new(
		e.kind(),
		format!(
			"packet data is committed to {:?}; move it over {:?} to recover: {}",
			tmp, file, e
		),
	)
}
