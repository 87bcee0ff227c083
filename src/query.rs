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

// Query execution. The walker emits packet paths in plan order; a pool of
// loader threads reads and decodes them with up to `query_parallelism`
// loads in flight; the cursor drains completions FIFO so records stream in
// plan order regardless of which load finishes first.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::{
	bookmark::Bookmark,
	db::Db,
	error::{Error, Result},
	filter::PathFilter,
	index::IndexDef,
	lock,
	packet::{DecodeFilter, Packet},
	plan::{Direction, FlexFilter, IndexPriority, Plan, QueryInput},
	schema::{Record, UNIQUE_SEPARATOR},
	value::Value,
	walk::TreeWalker,
};

/// Plan input assembly for one query. Obtained from [`Db::query`].
pub struct Query<'a, R: Record> {
	db: &'a Db,
	input: QueryInput<R>,
}

impl<'a, R: Record> Query<'a, R> {
	pub(crate) fn new(db: &'a Db) -> Query<'a, R> {
		Query { db, input: QueryInput::new() }
	}

	/// Set the path filter for a column, replacing any previous filter on
	/// the same column.
	pub fn filter(mut self, column: usize, filter: PathFilter) -> Self {
		match self.input.path_filters.iter_mut().find(|(c, _)| *c == column) {
			Some(entry) => entry.1 = filter,
			None => self.input.path_filters.push((column, filter)),
		}
		self
	}

	/// Add an arbitrary record predicate, applied after materialization.
	/// Columns missing from a packet file are null in the record it sees.
	pub fn flex_filter(mut self, filter: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
		self.input.flex_filters.push(Box::new(filter));
		self
	}

	pub fn order_by(mut self, column: usize, direction: Direction) -> Self {
		self.input.sorting.push((column, direction));
		self
	}

	/// Maximum records to serve. Zero means unlimited.
	pub fn limit(mut self, limit: u64) -> Self {
		self.input.limit = limit;
		self
	}

	/// Resume after the record a previous cursor bookmarked.
	pub fn after_bookmark(mut self, bookmark: Bookmark) -> Self {
		self.input.bookmark = Some(bookmark);
		self
	}

	/// Force the named index instead of the selection heuristic.
	pub fn with_index(mut self, name: &str) -> Self {
		self.input.hinted_index = Some(name.to_string());
		self
	}

	pub fn priority(mut self, priority: IndexPriority) -> Self {
		self.input.priority = priority;
		self
	}

	/// The textual plan this query would run with.
	pub fn describe(&self) -> Result<String> {
		Ok(Plan::build(&self.input)?.describe())
	}

	pub(crate) fn into_input(self) -> QueryInput<R> {
		self.input
	}

	pub fn execute(self) -> Result<Cursor<R>> {
		let Query { db, input } = self;
		let plan = Plan::build(&input)?;
		let resume = match &input.bookmark {
			Some(bookmark) => Some(Resume::build::<R>(bookmark, &plan)?),
			None => None,
		};
		let walker =
			TreeWalker::new(db.root(), &plan, resume.as_ref().map(|r| r.levels.clone()));
		let parallelism = db.options().query_parallelism.max(1);
		let shared = Arc::new(Shared {
			root: db.root().to_path_buf(),
			index: plan.index,
			free_path: plan.free_path.clone(),
			flex: input.flex_filters,
			free_sort: plan.free_sort.clone(),
		});
		let loader = Loader::spawn(parallelism, shared);
		Ok(Cursor {
			plan,
			walker,
			loader,
			pending: VecDeque::new(),
			parallelism,
			current: None,
			resume,
			served: 0,
			last: None,
			done: false,
		})
	}
}

// Everything a loader thread needs, shared across the pool.
struct Shared<R: Record> {
	root: PathBuf,
	index: &'static IndexDef,
	free_path: Vec<(usize, PathFilter)>,
	flex: Vec<FlexFilter<R>>,
	free_sort: Vec<(usize, Direction)>,
}

struct Loaded<R> {
	path: Vec<String>,
	records: Vec<R>,
}

struct Task<R: Record> {
	path: Vec<String>,
	done: Sender<Result<Loaded<R>>>,
}

struct Loader<R: Record> {
	tx: Option<Sender<Task<R>>>,
	workers: Vec<std::thread::JoinHandle<()>>,
}

impl<R: Record> Loader<R> {
	fn spawn(parallelism: usize, shared: Arc<Shared<R>>) -> Loader<R> {
		let (tx, rx) = unbounded::<Task<R>>();
		let workers = (0..parallelism)
			.map(|_| {
				let rx = rx.clone();
				let shared = shared.clone();
				std::thread::spawn(move || {
					while let Ok(task) = rx.recv() {
						let result = load_packet(&shared, task.path);
						let _ = task.done.send(result);
					}
				})
			})
			.collect();
		Loader { tx: Some(tx), workers }
	}

	fn send(&self, task: Task<R>) -> Result<()> {
		match &self.tx {
			Some(tx) => tx.send(task).map_err(|_| Error::Aborted),
			None => Err(Error::Aborted),
		}
	}
}

impl<R: Record> Drop for Loader<R> {
	fn drop(&mut self) {
		self.tx.take();
		for worker in self.workers.drain(..) {
			let _ = worker.join();
		}
	}
}

fn load_packet<R: Record>(shared: &Shared<R>, path: Vec<String>) -> Result<Loaded<R>> {
	let mut packet = Packet::<R>::new(&shared.root, shared.index, path);
	{
		// Readers hold the stripe only while the bytes are read; decoding
		// happens off-lock.
		let _guard = lock::lock_cooperative(packet.file());
		packet.load()?;
	}
	let filter = DecodeFilter {
		free_path: &shared.free_path,
		flex: &shared.flex,
		free_sort: &shared.free_sort,
	};
	let records = packet.decode(Some(&filter))?;
	Ok(Loaded { path: packet.path_values().to_vec(), records })
}

// The bookmarked position, resolved against the plan's index.
struct Resume {
	levels: Vec<(Value, String)>,
	path: Vec<String>,
	unique: String,
}

impl Resume {
	fn build<R: Record>(bookmark: &Bookmark, plan: &Plan) -> Result<Resume> {
		let schema = plan.schema;
		let fragment = bookmark.fragment_for(schema.table, plan.index.name).ok_or_else(|| {
			Error::InvalidBookmark(format!(
				"no fragment for table {} index {}",
				schema.table, plan.index.name
			))
		})?;
		let mut levels = Vec::with_capacity(plan.index.columns.len());
		for &column in plan.index.columns {
			let name = schema.columns[column].name;
			let text = fragment.path.get(name).ok_or_else(|| {
				Error::InvalidBookmark(format!("missing level value for column {}", name))
			})?;
			let value = schema.from_string(column, text).ok_or_else(|| {
				Error::InvalidBookmark(format!("unreadable level value for column {}", name))
			})?;
			levels.push((value, text.clone()));
		}
		let mut unique = String::new();
		for (i, &column) in schema.unique.iter().enumerate() {
			let name = schema.columns[column].name;
			let text = fragment.path.get(name).ok_or_else(|| {
				Error::InvalidBookmark(format!("missing unique value for column {}", name))
			})?;
			if i > 0 {
				unique.push(UNIQUE_SEPARATOR);
			}
			unique.push_str(text);
		}
		let path = levels.iter().map(|(_, text)| text.clone()).collect();
		Ok(Resume { levels, path, unique })
	}
}

/// Streaming query result. Records come out in plan order; `bookmark`
/// captures the position after the last record served.
pub struct Cursor<R: Record> {
	plan: Plan,
	walker: TreeWalker,
	loader: Loader<R>,
	pending: VecDeque<Receiver<Result<Loaded<R>>>>,
	parallelism: usize,
	current: Option<(Vec<R>, usize)>,
	resume: Option<Resume>,
	served: u64,
	last: Option<R>,
	done: bool,
}

impl<R: Record> Cursor<R> {
	pub fn fetch_next(&mut self) -> Result<Option<R>> {
		loop {
			if self.done {
				return Ok(None);
			}
			if self.plan.limit > 0 && self.served >= self.plan.limit {
				self.done = true;
				return Ok(None);
			}
			if let Some((records, position)) = &mut self.current {
				if *position < records.len() {
					let record = records[*position].clone();
					*position += 1;
					self.served += 1;
					self.last = Some(record.clone());
					return Ok(Some(record));
				}
				self.current = None;
			}

			self.fill()?;
			let receiver = match self.pending.pop_front() {
				Some(receiver) => receiver,
				None => {
					self.done = true;
					if self.resume.is_some() {
						return Err(Error::InvalidBookmark("bookmarked record is gone".into()));
					}
					return Ok(None);
				}
			};
			let loaded = match receiver.recv() {
				Ok(Ok(loaded)) => loaded,
				Ok(Err(e)) => {
					self.drain();
					self.done = true;
					return Err(e);
				}
				Err(_) => {
					self.drain();
					self.done = true;
					return Err(Error::Aborted);
				}
			};

			let mut position = 0;
			if let Some(resume) = self.resume.take() {
				// The first packet must be the bookmarked one and must
				// still hold the bookmarked record; serving resumes right
				// after it.
				if loaded.path != resume.path {
					self.done = true;
					return Err(Error::InvalidBookmark("bookmarked record is gone".into()));
				}
				let schema = self.plan.schema;
				match loaded.records.iter().position(|r| schema.unique_key(r) == resume.unique) {
					Some(found) => position = found + 1,
					None => {
						self.done = true;
						return Err(Error::InvalidBookmark("bookmarked record is gone".into()));
					}
				}
			}
			self.current = Some((loaded.records, position));
		}
	}

	/// Continuation token for the record last returned by `fetch_next`.
	/// `None` before the first record.
	pub fn bookmark(&self) -> Option<Bookmark> {
		self.last.as_ref().map(|record| Bookmark::from_record(record, self.plan.index))
	}

	// Keep up to `parallelism` loads in flight, in walk order.
	fn fill(&mut self) -> Result<()> {
		while self.pending.len() < self.parallelism {
			match self.walker.next_packet()? {
				Some(path) => {
					let (done_tx, done_rx) = bounded(1);
					self.loader.send(Task { path, done: done_tx })?;
					self.pending.push_back(done_rx);
				}
				None => break,
			}
		}
		Ok(())
	}

	// Await every in-flight load before surfacing a failure.
	fn drain(&mut self) {
		for receiver in self.pending.drain(..) {
			let _ = receiver.recv();
		}
	}
}
