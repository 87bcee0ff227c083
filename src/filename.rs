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

// Reversible encoding of arbitrary column values into file names that are
// safe on POSIX and Windows filesystems, including case-insensitive ones.
//
// Encoded form:
// ""        -> "$"
// reserved  -> "=" followed by a one-character code
// 'A'..'Z'  -> "'" followed by the letter (the marker is a decode no-op,
//              it keeps "A" and "a" distinct under case folding)
// ' '       -> "+"
// '.'       -> ","
// reserved OS device names get a trailing "'"

use crate::error::{Error, Result};

const ESCAPE: char = '=';
const MARKER: char = '\'';
const SPACE: char = '+';
const DOT: char = ',';
const EMPTY: &str = "$";

// Punctuation that is unsafe in file names, or meta to this encoder, with
// its escape code.
const PUNCT_CODES: &[(char, char)] = &[
	('/', 's'),
	('\\', 'b'),
	(':', 'c'),
	('*', 'a'),
	('?', 'q'),
	('"', 'u'),
	('<', 'l'),
	('>', 'g'),
	('|', 'p'),
	('%', 'r'),
	('\0', 'z'),
	('\t', 't'),
	('\r', 'm'),
	('\n', 'n'),
	(ESCAPE, 'e'),
	(MARKER, 'k'),
	(SPACE, 'w'),
	(DOT, 'd'),
	('$', 'o'),
];

// Control characters without a mnemonic above, in byte order. 0x00, 0x09,
// 0x0a and 0x0d are named; the remaining 28 plus DEL map positionally.
const CTRL_CODES: &[u8; 29] = b"0123456789ABCDEFGHIJKLMNOPQRS";

fn named_ctrl(b: u8) -> bool {
	matches!(b, 0x00 | 0x09 | 0x0a | 0x0d)
}

fn ctrl_bytes() -> impl Iterator<Item = u8> {
	(0x00u8..0x20).chain(std::iter::once(0x7f)).filter(|b| !named_ctrl(*b))
}

fn escape_code(c: char) -> Option<char> {
	if let Some(&(_, code)) = PUNCT_CODES.iter().find(|(p, _)| *p == c) {
		return Some(code);
	}
	if (c as u32) < 0x20 || c == '\u{7f}' {
		let pos = ctrl_bytes().position(|b| b as char == c)?;
		return Some(CTRL_CODES[pos] as char);
	}
	None
}

fn unescape_code(code: char) -> Option<char> {
	if let Some(&(c, _)) = PUNCT_CODES.iter().find(|(_, p)| *p == code) {
		return Some(c);
	}
	let pos = CTRL_CODES.iter().position(|c| *c as char == code)?;
	ctrl_bytes().nth(pos).map(|b| b as char)
}

fn is_reserved_os_name(name: &str) -> bool {
	let lower = name.to_ascii_lowercase();
	match lower.as_str() {
		"con" | "prn" | "aux" | "nul" => true,
		_ => {
			(lower.starts_with("com") || lower.starts_with("lpt"))
				&& lower.len() == 4
				&& lower.as_bytes()[3].is_ascii_digit()
				&& lower.as_bytes()[3] != b'0'
		}
	}
}

pub fn encode(name: &str) -> String {
	if name.is_empty() {
		return EMPTY.to_string();
	}
	let mut out = String::with_capacity(name.len() + 4);
	for c in name.chars() {
		if let Some(code) = escape_code(c) {
			out.push(ESCAPE);
			out.push(code);
		} else if c == ' ' {
			out.push(SPACE);
		} else if c == '.' {
			out.push(DOT);
		} else if c.is_ascii_uppercase() {
			out.push(MARKER);
			out.push(c);
		} else {
			out.push(c);
		}
	}
	if is_reserved_os_name(&out) {
		out.push(MARKER);
	}
	out
}

pub fn decode(name: &str) -> Result<String> {
	if name == EMPTY {
		return Ok(String::new());
	}
	let mut out = String::with_capacity(name.len());
	let mut chars = name.chars();
	while let Some(c) = chars.next() {
		match c {
			ESCAPE => match chars.next().and_then(unescape_code) {
				Some(original) => out.push(original),
				None => {
					return Err(Error::corruption(
						std::path::Path::new(name),
						None,
						"invalid escape in file name".into(),
					))
				}
			},
			MARKER => (),
			SPACE => out.push(' '),
			DOT => out.push('.'),
			_ => out.push(c),
		}
	}
	Ok(out)
}

#[cfg(test)]
mod test {
	use super::{decode, encode};

	fn round_trip(s: &str) {
		let encoded = encode(s);
		assert!(!encoded.is_empty());
		for c in encoded.chars() {
			assert!(
				!matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' | ' ' | '.'),
				"reserved {:?} survived in {:?}",
				c,
				encoded
			);
			assert!((c as u32) >= 0x20 && c != '\u{7f}', "control char in {:?}", encoded);
		}
		assert!(!super::is_reserved_os_name(&encoded));
		assert_eq!(decode(&encoded).unwrap(), s, "through {:?}", encoded);
	}

	#[test]
	fn round_trips() {
		round_trip("");
		round_trip("a11");
		round_trip("2020-01-02");
		round_trip("Hello World");
		round_trip("a/b\\c:d*e?f\"g<h>i|j%k");
		round_trip("='+,$");
		round_trip("\0\t\r\n\x01\x1f\x7f");
		round_trip("mixedCASEname");
		round_trip("ünïcödé");
		round_trip("..");
		round_trip("con");
		round_trip("LPT1");
	}

	#[test]
	fn case_preserved() {
		let a = encode("a");
		let upper = encode("A");
		assert_ne!(a.to_ascii_lowercase(), upper.to_ascii_lowercase());
		assert_eq!(decode(&upper).unwrap(), "A");
	}

	#[test]
	fn reserved_device_names_suffixed() {
		for name in ["con", "prn", "aux", "nul", "com1", "lpt9"] {
			let encoded = encode(name);
			assert!(encoded.ends_with('\''), "{:?} -> {:?}", name, encoded);
			assert_eq!(decode(&encoded).unwrap(), name);
		}
		// Not devices: no suffix.
		assert_eq!(encode("com0"), "com0");
		assert_eq!(encode("console"), "console");
	}

	#[test]
	fn empty_sentinel_unambiguous() {
		assert_eq!(encode(""), "$");
		assert_eq!(encode("$"), "=o");
		assert_eq!(decode("$").unwrap(), "");
		assert_eq!(decode("=o").unwrap(), "$");
	}

	#[test]
	fn invalid_escape_rejected() {
		assert!(decode("=").is_err());
		assert!(decode("=!").is_err());
	}

	#[test]
	fn random_round_trips() {
		use rand::Rng;
		let mut rng = rand::thread_rng();
		for _ in 0..200 {
			let len = rng.gen_range(0..24);
			let s: String = (0..len)
				.map(|_| char::from_u32(rng.gen_range(0u32..0x250)).unwrap_or('x'))
				.collect();
			round_trip(&s);
		}
	}
}
