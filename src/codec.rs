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

// Packet wire format: a gzip stream wrapping tab-separated text. The first
// row holds column names. Tabs, newlines and backslashes inside a field are
// backslash-escaped so a record is always exactly one line.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub fn compress(text: &str) -> std::io::Result<Vec<u8>> {
	let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(text.as_bytes())?;
	encoder.finish()
}

pub fn decompress(bytes: &[u8]) -> std::io::Result<String> {
	let mut text = String::new();
	GzDecoder::new(bytes).read_to_string(&mut text)?;
	Ok(text)
}

pub fn escape_field(field: &str) -> String {
	let mut out = String::with_capacity(field.len());
	for c in field.chars() {
		match c {
			'\\' => out.push_str("\\\\"),
			'\t' => out.push_str("\\t"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			_ => out.push(c),
		}
	}
	out
}

/// Inverse of `escape_field`. `None` on a dangling or unknown escape.
pub fn unescape_field(field: &str) -> Option<String> {
	let mut out = String::with_capacity(field.len());
	let mut chars = field.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('\\') => out.push('\\'),
			Some('t') => out.push('\t'),
			Some('n') => out.push('\n'),
			Some('r') => out.push('\r'),
			_ => return None,
		}
	}
	Some(out)
}

pub fn join_row<'a>(fields: impl Iterator<Item = &'a str>) -> String {
	let mut row = String::new();
	for (i, field) in fields.enumerate() {
		if i > 0 {
			row.push('\t');
		}
		row.push_str(&escape_field(field));
	}
	row
}

/// Split one line into unescaped fields. `None` on a malformed field.
pub fn split_row(line: &str) -> Option<Vec<String>> {
	line.split('\t').map(unescape_field).collect()
}
