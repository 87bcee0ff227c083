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

// Batched writes. `add`/`remove` expand each record across every index of
// the table into per-packet plans; `commit` applies query deletes, query
// updates, then the packet plans, each phase on a bounded worker pool.
// Per-packet work is serialized by the packet's stripe lock; across
// packets a commit gives no ordering guarantee, and concurrent readers may
// observe a partially applied commit (read-uncommitted).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{
	db::Db,
	error::{Error, Result},
	index::IndexDef,
	lock,
	packet::Packet,
	plan::{Plan, QueryInput},
	query::Query,
	schema::{Record, Schema},
	walk::TreeWalker,
};

type Updater<R> = Box<dyn Fn(&mut R) + Send + Sync>;
type OnUpdate<R> = Box<dyn Fn(&R, R) -> Option<R> + Send + Sync>;

struct PacketPlan<R> {
	index: &'static IndexDef,
	path: Vec<String>,
	upserts: BTreeMap<String, R>,
	removes: BTreeSet<String>,
}

/// A write batch against one table. Obtained from [`Db::transaction`];
/// nothing touches disk until `commit`.
pub struct Transaction<'a, R: Record> {
	db: &'a Db,
	plans: HashMap<(&'static str, String), PacketPlan<R>>,
	deletes: Vec<QueryInput<R>>,
	updates: Vec<(QueryInput<R>, Updater<R>)>,
	on_update: Option<OnUpdate<R>>,
	poisoned: bool,
}

impl<'a, R: Record> Transaction<'a, R> {
	pub(crate) fn new(db: &'a Db) -> Transaction<'a, R> {
		Transaction {
			db,
			plans: HashMap::new(),
			deletes: Vec::new(),
			updates: Vec::new(),
			on_update: None,
			poisoned: false,
		}
	}

	/// Upsert a record under every index of its table.
	pub fn add(&mut self, record: R) {
		let schema = R::schema();
		let unique = schema.unique_key(&record);
		for index in schema.indexes {
			let path = schema.index_path(&record, index);
			let plan = plan_entry(&mut self.plans, index, path);
			plan.removes.remove(&unique);
			plan.upserts.insert(unique.clone(), record.clone());
		}
	}

	/// Remove the record with this record's unique key from every index.
	pub fn remove(&mut self, record: &R) {
		let schema = R::schema();
		let unique = schema.unique_key(record);
		for index in schema.indexes {
			let path = schema.index_path(record, index);
			let plan = plan_entry(&mut self.plans, index, path);
			plan.upserts.remove(&unique);
			plan.removes.insert(unique.clone());
		}
	}

	/// Delete every record the query matches, across all indexes.
	pub fn delete(&mut self, query: Query<'_, R>) {
		self.deletes.push(query.into_input());
	}

	/// Mutate every record the query matches in place. The updater must
	/// not change indexed columns.
	pub fn update(
		&mut self,
		query: Query<'_, R>,
		updater: impl Fn(&mut R) + Send + Sync + 'static,
	) {
		self.updates.push((query.into_input(), Box::new(updater)));
	}

	/// Hook invoked under the packet lock when an upsert meets an existing
	/// record. Returning `None` discards the upsert; the returned record
	/// must keep the packet's index path.
	pub fn on_update(&mut self, hook: impl Fn(&R, R) -> Option<R> + Send + Sync + 'static) {
		self.on_update = Some(Box::new(hook));
	}

	pub fn is_empty(&self) -> bool {
		self.plans.is_empty() && self.deletes.is_empty() && self.updates.is_empty()
	}

	/// Apply all batched work. On success the transaction is emptied and
	/// reusable; after a failed commit it only ever reports `Aborted`.
	pub fn commit(&mut self) -> Result<()> {
		if self.poisoned {
			return Err(Error::Aborted);
		}
		let result = self.commit_phases();
		if result.is_err() {
			self.poisoned = true;
		}
		result
	}

	fn commit_phases(&mut self) -> Result<()> {
		let deletes = mem::take(&mut self.deletes);
		let updates = mem::take(&mut self.updates);
		let plans: Vec<PacketPlan<R>> = mem::take(&mut self.plans).into_values().collect();
		if deletes.is_empty() && updates.is_empty() && plans.is_empty() {
			return Ok(());
		}
		let durable = self.db.options().durable_writes;
		let parallelism = self.db.options().transaction_parallelism.max(1);
		let root = self.db.root();
		let packets = plans.len();

		for input in &deletes {
			run_query_delete(root, input, durable, parallelism)?;
		}
		for (input, updater) in &updates {
			run_query_update(root, input, updater, durable, parallelism)?;
		}
		run_plans(root, plans, self.on_update.as_deref(), durable, parallelism)?;
		log::debug!(
			target: "packet-db",
			"Committed {} packet plans, {} query deletes, {} query updates on table {}",
			packets,
			deletes.len(),
			updates.len(),
			R::schema().table,
		);
		Ok(())
	}
}

fn plan_entry<'p, R: Record>(
	plans: &'p mut HashMap<(&'static str, String), PacketPlan<R>>,
	index: &'static IndexDef,
	path: Vec<String>,
) -> &'p mut PacketPlan<R> {
	let key = (index.name, Schema::path_key(&path));
	plans.entry(key).or_insert_with(|| PacketPlan {
		index,
		path,
		upserts: BTreeMap::new(),
		removes: BTreeSet::new(),
	})
}

// Bounded worker pool over a fixed work list. The first error stops peers
// from claiming further items; everyone drains before it is re-surfaced.
fn run_pool<T, F>(parallelism: usize, items: Vec<T>, work: F) -> Result<()>
where
	T: Send,
	F: Fn(T) -> Result<()> + Sync,
{
	if items.is_empty() {
		return Ok(());
	}
	let workers = parallelism.min(items.len());
	let (tx, rx) = crossbeam_channel::unbounded();
	for item in items {
		let _ = tx.send(item);
	}
	drop(tx);
	let first_error = Mutex::new(None);
	let stop = AtomicBool::new(false);
	std::thread::scope(|scope| {
		for _ in 0..workers {
			let rx = rx.clone();
			let first_error = &first_error;
			let stop = &stop;
			let work = &work;
			scope.spawn(move || {
				while let Ok(item) = rx.recv() {
					if stop.load(Ordering::Relaxed) {
						continue;
					}
					if let Err(e) = work(item) {
						stop.store(true, Ordering::Relaxed);
						let mut slot = first_error.lock();
						if slot.is_none() {
							*slot = Some(e);
						}
					}
				}
			});
		}
	});
	match first_error.into_inner() {
		Some(e) => Err(e),
		None => Ok(()),
	}
}

fn collect_packets(root: &Path, plan: &Plan) -> Result<Vec<Vec<String>>> {
	let mut walker = TreeWalker::new(root, plan, None);
	let mut paths = Vec::new();
	while let Some(path) = walker.next_packet()? {
		paths.push(path);
	}
	Ok(paths)
}

fn record_matches<R: Record>(input: &QueryInput<R>, plan: &Plan, record: &R) -> bool {
	let schema = R::schema();
	for (column, filter) in &plan.free_path {
		let value = record.get(*column);
		let text = schema.to_string(*column, &value);
		if !filter.matches(&value, &text) {
			return false;
		}
	}
	input.flex_filters.iter().all(|f| f(record))
}

// Matched records are removed from the packets of the chosen index while a
// collector gathers their locations under every other index; a second pass
// removes them there too.
fn run_query_delete<R: Record>(
	root: &Path,
	input: &QueryInput<R>,
	durable: bool,
	parallelism: usize,
) -> Result<()> {
	let schema = R::schema();
	let plan = Plan::build(input)?;
	let paths = collect_packets(root, &plan)?;
	type Collected<'i> = (&'i IndexDef, Vec<String>, Vec<String>);
	let collector: Mutex<HashMap<(&'static str, String), Collected<'static>>> =
		Mutex::new(HashMap::new());

	run_pool(parallelism, paths, |path| {
		let mut packet = Packet::<R>::new(root, plan.index, path);
		let _guard = lock::lock(packet.file());
		packet.load()?;
		let records = packet.decode(None)?;
		let matched: Vec<R> =
			records.into_iter().filter(|r| record_matches(input, &plan, r)).collect();
		if matched.is_empty() {
			return Ok(());
		}
		for record in &matched {
			let unique = schema.unique_key(record);
			packet.remove(&unique);
			let mut collector = collector.lock();
			for index in schema.indexes {
				if index.name == plan.index.name {
					continue;
				}
				let other_path = schema.index_path(record, index);
				let key = (index.name, Schema::path_key(&other_path));
				let entry = collector
					.entry(key)
					.or_insert_with(|| (index, other_path, Vec::new()));
				entry.2.push(unique.clone());
			}
		}
		log::trace!(
			target: "packet-db",
			"Deleted {} records from {:?}",
			matched.len(),
			packet.file(),
		);
		packet.save(durable)
	})?;

	let others: Vec<Collected<'static>> = collector.into_inner().into_values().collect();
	run_pool(parallelism, others, |(index, path, uniques)| {
		let mut packet = Packet::<R>::new(root, index, path);
		let _guard = lock::lock(packet.file());
		packet.load()?;
		packet.decode(None)?;
		let mut changed = false;
		for unique in &uniques {
			changed |= packet.remove(unique).is_some();
		}
		if changed {
			packet.save(durable)?;
		}
		Ok(())
	})
}

// In-place mutation of matched records. Indexed columns are verified
// unchanged before the packet is touched, so a violation leaves it intact.
fn run_query_update<R: Record>(
	root: &Path,
	input: &QueryInput<R>,
	updater: &Updater<R>,
	durable: bool,
	parallelism: usize,
) -> Result<()> {
	let schema = R::schema();
	let plan = Plan::build(input)?;
	let paths = collect_packets(root, &plan)?;
	type Collected<'i, R> = (&'i IndexDef, Vec<String>, Vec<(String, String, R)>);
	let collector: Mutex<HashMap<(&'static str, String), Collected<'static, R>>> =
		Mutex::new(HashMap::new());

	run_pool(parallelism, paths, |path| {
		let mut packet = Packet::<R>::new(root, plan.index, path);
		let _guard = lock::lock(packet.file());
		packet.load()?;
		let records = packet.decode(None)?;
		let mut changes = Vec::new();
		for record in records {
			if !record_matches(input, &plan, &record) {
				continue;
			}
			let old_unique = schema.unique_key(&record);
			let mut updated = record.clone();
			updater(&mut updated);
			for index in schema.indexes {
				if schema.index_path(&record, index) != schema.index_path(&updated, index) {
					return Err(Error::IllegalUpdate {
						table: schema.table,
						msg: format!("updater changed columns of {}", index),
					});
				}
			}
			changes.push((old_unique, schema.unique_key(&updated), updated));
		}
		if changes.is_empty() {
			return Ok(());
		}
		for (old_unique, new_unique, updated) in &changes {
			if old_unique != new_unique {
				packet.remove(old_unique);
			}
			packet.set(new_unique.clone(), updated.clone());
			let mut collector = collector.lock();
			for index in schema.indexes {
				if index.name == plan.index.name {
					continue;
				}
				let other_path = schema.index_path(updated, index);
				let key = (index.name, Schema::path_key(&other_path));
				let entry = collector
					.entry(key)
					.or_insert_with(|| (index, other_path, Vec::new()));
				entry.2.push((old_unique.clone(), new_unique.clone(), updated.clone()));
			}
		}
		packet.save(durable)
	})?;

	let others: Vec<Collected<'static, R>> = collector.into_inner().into_values().collect();
	run_pool(parallelism, others, |(index, path, changes)| {
		let mut packet = Packet::<R>::new(root, index, path);
		let _guard = lock::lock(packet.file());
		packet.load()?;
		packet.decode(None)?;
		for (old_unique, new_unique, updated) in &changes {
			if old_unique != new_unique {
				packet.remove(old_unique);
			}
			packet.set(new_unique.clone(), updated.clone());
		}
		packet.save(durable)
	})
}

fn run_plans<R: Record>(
	root: &Path,
	plans: Vec<PacketPlan<R>>,
	hook: Option<&(dyn Fn(&R, R) -> Option<R> + Send + Sync)>,
	durable: bool,
	parallelism: usize,
) -> Result<()> {
	let schema = R::schema();
	run_pool(parallelism, plans, |plan| {
		let mut packet = Packet::<R>::new(root, plan.index, plan.path.clone());
		let _guard = lock::lock(packet.file());
		packet.load()?;
		packet.decode(None)?;
		for (unique, record) in &plan.upserts {
			let existing = packet.get(unique).cloned();
			match (hook, existing) {
				(Some(hook), Some(old)) => match hook(&old, record.clone()) {
					None => continue,
					Some(result) => {
						if schema.index_path(&result, plan.index) != plan.path {
							return Err(Error::IllegalUpdate {
								table: schema.table,
								msg: format!("update hook changed columns of {}", plan.index),
							});
						}
						let new_unique = schema.unique_key(&result);
						if new_unique != *unique {
							packet.remove(unique);
						}
						packet.set(new_unique, result);
					}
				},
				_ => packet.set(unique.clone(), record.clone()),
			}
		}
		for unique in &plan.removes {
			packet.remove(unique);
		}
		packet.save(durable)
	})
}

#[cfg(test)]
mod test {
	use crate::db::Db;
	use crate::error::Error;
	use crate::options::Options;
	use crate::schema::fixture::{metric, Metric};
	use std::path::PathBuf;

	struct TempDir(PathBuf);

	impl TempDir {
		fn new(name: &'static str) -> TempDir {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push("packet-db-test");
			path.push("transaction");
			path.push(name);
			if path.exists() {
				std::fs::remove_dir_all(&path).unwrap();
			}
			std::fs::create_dir_all(&path).unwrap();
			TempDir(path)
		}

		fn db(&self) -> Db {
			Db::open(&Options::with_path(&self.0)).unwrap()
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			if self.0.exists() {
				std::fs::remove_dir_all(&self.0).unwrap();
			}
		}
	}

	fn count_all(db: &Db) -> usize {
		let mut cursor = db.query::<Metric>().unwrap().execute().unwrap();
		let mut count = 0;
		while cursor.fetch_next().unwrap().is_some() {
			count += 1;
		}
		count
	}

	#[test]
	fn add_then_remove_cancels() {
		let dir = TempDir::new("add_then_remove_cancels");
		let db = dir.db();
		let record = metric("2020-01-02", "a11", "ad1", 100);
		let mut tx = db.transaction::<Metric>().unwrap();
		tx.add(record.clone());
		tx.remove(&record);
		tx.commit().unwrap();
		assert_eq!(count_all(&db), 0);
	}

	#[test]
	fn remove_then_add_stores() {
		let dir = TempDir::new("remove_then_add_stores");
		let db = dir.db();
		let record = metric("2020-01-02", "a11", "ad1", 100);
		let mut tx = db.transaction::<Metric>().unwrap();
		tx.remove(&record);
		tx.add(record);
		tx.commit().unwrap();
		assert_eq!(count_all(&db), 1);
	}

	#[test]
	fn empty_commit_is_ok_and_reusable() {
		let dir = TempDir::new("empty_commit_is_ok_and_reusable");
		let db = dir.db();
		let mut tx = db.transaction::<Metric>().unwrap();
		assert!(tx.is_empty());
		tx.commit().unwrap();
		tx.add(metric("2020-01-02", "a11", "ad1", 100));
		tx.commit().unwrap();
		assert!(tx.is_empty());
		assert_eq!(count_all(&db), 1);
	}

	#[test]
	fn failed_commit_poisons_the_transaction() {
		let dir = TempDir::new("failed_commit_poisons_the_transaction");
		let db = dir.db();
		let mut tx = db.transaction::<Metric>().unwrap();
		tx.add(metric("2020-01-02", "a11", "ad1", 100));
		tx.commit().unwrap();

		let mut tx = db.transaction::<Metric>().unwrap();
		tx.on_update(|_, mut new: Metric| {
			new.account = Some("a99".to_string());
			Some(new)
		});
		tx.add(metric("2020-01-02", "a11", "ad1", 200));
		match tx.commit() {
			Err(Error::IllegalUpdate { table: "metrics", .. }) => (),
			other => panic!("expected illegal update, got {:?}", other),
		}
		assert!(matches!(tx.commit(), Err(Error::Aborted)));
	}
}
