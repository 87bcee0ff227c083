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

// Process-wide striped locks keyed by packet path. Every packet file
// operation must run under the packet's lock. Nested acquisition is
// forbidden: stripes alias, so holding two guards at once can deadlock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

const BUCKETS: usize = 4096;

static LOCKS: [Mutex<()>; BUCKETS] = [const { Mutex::new(()) }; BUCKETS];

/// Guard over one stripe. Released on drop.
pub struct PathLock(#[allow(dead_code)] MutexGuard<'static, ()>);

fn bucket(path: &Path) -> &'static Mutex<()> {
	let mut hasher = DefaultHasher::new();
	path.hash(&mut hasher);
	&LOCKS[hasher.finish() as usize % BUCKETS]
}

/// Block until the packet's stripe is available.
pub fn lock(path: &Path) -> PathLock {
	PathLock(bucket(path).lock())
}

/// Yield until the packet's stripe is available. For workers that should
/// not park on a writer-held stripe.
pub fn lock_cooperative(path: &Path) -> PathLock {
	let bucket = bucket(path);
	loop {
		if let Some(guard) = bucket.try_lock() {
			return PathLock(guard);
		}
		std::thread::yield_now();
	}
}

#[cfg(test)]
mod test {
	use super::{lock, lock_cooperative};
	use std::path::Path;
	use std::sync::mpsc;
	use std::time::Duration;

	#[test]
	fn same_path_excludes() {
		let path = Path::new("var/data/metrics/account_date/a11/2020-01-02.tsv.gz");
		let guard = lock(path);
		let (tx, rx) = mpsc::channel();
		let handle = std::thread::spawn(move || {
			let _guard = lock(Path::new("var/data/metrics/account_date/a11/2020-01-02.tsv.gz"));
			tx.send(()).unwrap();
		});
		assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
		drop(guard);
		rx.recv_timeout(Duration::from_secs(5)).unwrap();
		handle.join().unwrap();
	}

	#[test]
	fn cooperative_waits_for_release() {
		let path = Path::new("var/data/metrics/date_account/2020-01-02/a11.tsv.gz");
		let guard = lock(path);
		let handle = std::thread::spawn(move || {
			let _guard = lock_cooperative(Path::new(
				"var/data/metrics/date_account/2020-01-02/a11.tsv.gz",
			));
		});
		std::thread::sleep(Duration::from_millis(50));
		drop(guard);
		handle.join().unwrap();
	}

	#[test]
	fn released_on_drop() {
		let path = Path::new("some/packet.tsv.gz");
		drop(lock(path));
		drop(lock(path));
		drop(lock_cooperative(path));
	}
}
