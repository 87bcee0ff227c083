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

// Ordered traversal of one index's directory tree. The walker keeps a
// stack of levels, one per index column; every consecutive pair of emitted
// packets is strictly ordered by the plan's bound sort prefix.

use std::path::{Path, PathBuf};

use crate::{
	error::{Error, Result},
	filename,
	filter::IndexFilter,
	packet::PACKET_EXT,
	plan::{Direction, LevelPlan, Plan},
	schema::Schema,
	value::Value,
};

struct Level {
	/// Decoded entries in traversal order: value and its string form.
	entries: Vec<(Value, String)>,
	cursor: usize,
}

pub(crate) struct TreeWalker {
	root: PathBuf,
	schema: &'static Schema,
	levels: Vec<LevelPlan>,
	/// Per-level resume point from a bookmark. Applies to a level only
	/// while every ancestor level sits exactly on its resume value.
	resume: Option<Vec<(Value, String)>>,
	stack: Vec<Level>,
	started: bool,
	done: bool,
}

impl TreeWalker {
	pub fn new(db_root: &Path, plan: &Plan, resume: Option<Vec<(Value, String)>>) -> TreeWalker {
		let root = db_root.join(plan.schema.table).join(plan.index.name);
		TreeWalker {
			root,
			schema: plan.schema,
			levels: plan.levels.clone(),
			resume,
			stack: Vec::new(),
			started: false,
			done: false,
		}
	}

	/// The next packet path in plan order, as index path string values.
	pub fn next_packet(&mut self) -> Result<Option<Vec<String>>> {
		if self.done {
			return Ok(None);
		}
		if !self.started {
			self.started = true;
			let level = self.read_level(0)?;
			self.stack.push(level);
		} else {
			match self.stack.last_mut() {
				Some(top) => top.cursor += 1,
				None => {
					self.done = true;
					return Ok(None);
				}
			}
		}
		loop {
			let exhausted = match self.stack.last() {
				Some(top) => top.cursor >= top.entries.len(),
				None => {
					self.done = true;
					return Ok(None);
				}
			};
			if exhausted {
				self.stack.pop();
				match self.stack.last_mut() {
					Some(parent) => parent.cursor += 1,
					None => {
						self.done = true;
						return Ok(None);
					}
				}
				continue;
			}
			if self.stack.len() == self.levels.len() {
				let path = self
					.stack
					.iter()
					.map(|level| level.entries[level.cursor].1.clone())
					.collect();
				return Ok(Some(path));
			}
			let next = self.read_level(self.stack.len())?;
			self.stack.push(next);
		}
	}

	// Stack holds exactly `depth` levels when this is called.
	fn read_level(&self, depth: usize) -> Result<Level> {
		let plan = &self.levels[depth];
		let resume = self.resume.as_ref().filter(|_| self.on_resume_prefix(depth));
		let invert = plan.direction == Direction::Desc;

		if let Some((value, text)) = &plan.strict {
			// Single accepted value, no directory read.
			let mut entries = vec![(value.clone(), text.clone())];
			if let Some(resume) = resume {
				let filter = IndexFilter::After(resume[depth].0.clone());
				entries.retain(|(v, _)| filter.intersects(v, invert));
			}
			return Ok(Level { entries, cursor: 0 });
		}

		let mut dir = self.root.clone();
		for level in &self.stack {
			dir.push(filename::encode(&level.entries[level.cursor].1));
		}
		let reader = match std::fs::read_dir(&dir) {
			Ok(reader) => reader,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(Level { entries: Vec::new(), cursor: 0 })
			}
			Err(e) => return Err(Error::io("read-dir", &dir, e)),
		};

		let last = depth + 1 == self.levels.len();
		let mut entries = Vec::new();
		for entry in reader {
			let entry = entry.map_err(|e| Error::io("read-dir", &dir, e))?;
			let name = match entry.file_name().into_string() {
				Ok(name) => name,
				Err(_) => continue,
			};
			let file_type = entry.file_type().map_err(|e| Error::io("read-dir", &dir, e))?;
			let encoded = if last {
				if !file_type.is_file() || !name.ends_with(PACKET_EXT) {
					continue;
				}
				&name[..name.len() - PACKET_EXT.len()]
			} else {
				if !file_type.is_dir() {
					continue;
				}
				name.as_str()
			};
			let text = filename::decode(encoded)?;
			let value = self.schema.from_string(plan.column, &text).ok_or_else(|| {
				Error::corruption(
					&dir.join(&name),
					None,
					format!("entry does not parse as column {}", self.schema.columns[plan.column].name),
				)
			})?;
			if let Some(filter) = &plan.filter {
				if !filter.matches(&value, &text) {
					continue;
				}
			}
			if let Some(resume) = resume {
				let filter = IndexFilter::After(resume[depth].0.clone());
				if !filter.intersects(&value, invert) {
					continue;
				}
			}
			entries.push((value, text));
		}
		entries.sort_by(|a, b| a.0.cmp(&b.0));
		if invert {
			entries.reverse();
		}
		log::trace!(
			target: "packet-db",
			"Walk level {} under {:?}: {} entries",
			depth,
			dir,
			entries.len(),
		);
		Ok(Level { entries, cursor: 0 })
	}

	fn on_resume_prefix(&self, depth: usize) -> bool {
		let resume = match &self.resume {
			Some(resume) => resume,
			None => return false,
		};
		(0..depth).all(|level| {
			self.stack[level].entries[self.stack[level].cursor].1 == resume[level].1
		})
	}
}

#[cfg(test)]
mod test {
	use super::TreeWalker;
	use crate::filter::PathFilter;
	use crate::packet::Packet;
	use crate::plan::{Direction, Plan, QueryInput};
	use crate::schema::fixture::{metric, Metric, ACCOUNT, DATE};
	use crate::schema::Record;
	use crate::value::Value;
	use std::path::PathBuf;

	struct TempDir(PathBuf);

	impl TempDir {
		fn new(name: &'static str) -> TempDir {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push("packet-db-test");
			path.push("walk");
			path.push(name);
			if path.exists() {
				std::fs::remove_dir_all(&path).unwrap();
			}
			std::fs::create_dir_all(&path).unwrap();
			TempDir(path)
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			if self.0.exists() {
				std::fs::remove_dir_all(&self.0).unwrap();
			}
		}
	}

	fn seed(dir: &TempDir, pairs: &[(&str, &str)]) {
		let index = Metric::schema().index_named("account_date").unwrap();
		for (account, date) in pairs {
			let mut packet =
				Packet::<Metric>::new(&dir.0, index, vec![account.to_string(), date.to_string()]);
			let record = metric(date, account, "ad1", 1);
			packet.set(Metric::schema().unique_key(&record), record);
			packet.save(false).unwrap();
		}
	}

	fn walk_all(walker: &mut TreeWalker) -> Vec<Vec<String>> {
		let mut paths = Vec::new();
		while let Some(path) = walker.next_packet().unwrap() {
			paths.push(path);
		}
		paths
	}

	fn path(parts: &[&str]) -> Vec<String> {
		parts.iter().map(|p| p.to_string()).collect()
	}

	#[test]
	fn emits_in_sorted_order() {
		let dir = TempDir::new("emits_in_sorted_order");
		seed(&dir, &[("a12", "2020-01-01"), ("a11", "2020-01-03"), ("a11", "2020-01-01")]);
		let input = QueryInput::<Metric>::new();
		let plan = Plan::build(&input).unwrap();
		let mut walker = TreeWalker::new(&dir.0, &plan, None);
		assert_eq!(
			walk_all(&mut walker),
			vec![
				path(&["a11", "2020-01-01"]),
				path(&["a11", "2020-01-03"]),
				path(&["a12", "2020-01-01"]),
			]
		);
	}

	#[test]
	fn descending_bound_sort_reverses_levels() {
		let dir = TempDir::new("descending_bound_sort_reverses_levels");
		seed(&dir, &[("a11", "2020-01-01"), ("a11", "2020-01-03"), ("a12", "2020-01-01")]);
		let mut input = QueryInput::<Metric>::new();
		input.sorting = vec![(ACCOUNT, Direction::Desc), (DATE, Direction::Desc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
		let mut walker = TreeWalker::new(&dir.0, &plan, None);
		assert_eq!(
			walk_all(&mut walker),
			vec![
				path(&["a12", "2020-01-01"]),
				path(&["a11", "2020-01-03"]),
				path(&["a11", "2020-01-01"]),
			]
		);
	}

	#[test]
	fn strict_level_prunes_siblings() {
		let dir = TempDir::new("strict_level_prunes_siblings");
		seed(&dir, &[("a11", "2020-01-01"), ("a12", "2020-01-01"), ("a12", "2020-01-02")]);
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(Value::Text("a12".into()))));
		let plan = Plan::build(&input).unwrap();
		let mut walker = TreeWalker::new(&dir.0, &plan, None);
		assert_eq!(
			walk_all(&mut walker),
			vec![path(&["a12", "2020-01-01"]), path(&["a12", "2020-01-02"])]
		);
	}

	#[test]
	fn bound_range_filter_prunes_subtrees() {
		let dir = TempDir::new("bound_range_filter_prunes_subtrees");
		seed(&dir, &[("a11", "2020-01-01"), ("a11", "2020-02-01"), ("a12", "2020-03-01")]);
		let mut input = QueryInput::<Metric>::new();
		input
			.path_filters
			.push((DATE, PathFilter::at_least(Value::Text("2020-02-01".into()))));
		let plan = Plan::build(&input).unwrap();
		let mut walker = TreeWalker::new(&dir.0, &plan, None);
		assert_eq!(
			walk_all(&mut walker),
			vec![path(&["a11", "2020-02-01"]), path(&["a12", "2020-03-01"])]
		);
	}

	#[test]
	fn resume_applies_only_on_the_bookmark_prefix() {
		let dir = TempDir::new("resume_applies_only_on_the_bookmark_prefix");
		seed(
			&dir,
			&[
				("a11", "2020-01-01"),
				("a11", "2020-01-02"),
				("a12", "2020-01-01"),
				("a12", "2020-01-02"),
			],
		);
		let input = QueryInput::<Metric>::new();
		let plan = Plan::build(&input).unwrap();
		let resume = Some(vec![
			(Value::Text("a11".into()), "a11".to_string()),
			(Value::Text("2020-01-02".into()), "2020-01-02".to_string()),
		]);
		let mut walker = TreeWalker::new(&dir.0, &plan, resume);
		// a11 resumes at 2020-01-02; a12 is past the prefix and starts from
		// its first date.
		assert_eq!(
			walk_all(&mut walker),
			vec![
				path(&["a11", "2020-01-02"]),
				path(&["a12", "2020-01-01"]),
				path(&["a12", "2020-01-02"]),
			]
		);
	}
}
