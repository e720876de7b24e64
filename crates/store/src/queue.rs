// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use ocap_types::RunQueueItem;
use tracing::trace;

use crate::{Error, KernelStore, Result, schema};

impl KernelStore {
	fn cursor(&self, key: &str) -> Result<u64> {
		let raw = self.db.get_required(key)?;
		raw.parse().map_err(|_| Error::Corrupt(format!("cursor {key} = `{raw}`")))
	}

	pub fn run_queue_length(&self) -> Result<u64> {
		Ok(self.cursor(schema::RUN_TAIL)? - self.cursor(schema::RUN_HEAD)?)
	}

	/// Index of the next item to be popped; names the crank savepoint.
	pub fn run_queue_head(&self) -> Result<u64> {
		self.cursor(schema::RUN_HEAD)
	}

	/// Append an item at the tail. Reference holds for the item's krefs
	/// are the caller's responsibility.
	pub fn enqueue_run(&mut self, item: &RunQueueItem) -> Result<u64> {
		let tail = self.cursor(schema::RUN_TAIL)?;
		self.set_json(&schema::run_item(tail), item)?;
		self.db.set(schema::RUN_TAIL, &(tail + 1).to_string())?;
		trace!(index = tail, "run queue enqueue");
		Ok(tail)
	}

	/// Pop the head item together with its queue index.
	pub fn dequeue_run(&mut self) -> Result<Option<(u64, RunQueueItem)>> {
		let head = self.cursor(schema::RUN_HEAD)?;
		let tail = self.cursor(schema::RUN_TAIL)?;
		if head == tail {
			return Ok(None);
		}
		let item = self.get_json(&schema::run_item(head))?;
		self.db.delete(&schema::run_item(head))?;
		self.db.set(schema::RUN_HEAD, &(head + 1).to_string())?;
		trace!(index = head, "run queue dequeue");
		Ok(Some((head, item)))
	}

	/// Every queued item, head first, without consuming. Used by the
	/// invariant sweep and diagnostics.
	pub fn run_queue_items(&self) -> Result<Vec<RunQueueItem>> {
		let head = self.cursor(schema::RUN_HEAD)?;
		let tail = self.cursor(schema::RUN_TAIL)?;
		let mut items = Vec::with_capacity((tail - head) as usize);
		for index in head..tail {
			items.push(self.get_json(&schema::run_item(index))?);
		}
		Ok(items)
	}
}

#[cfg(test)]
mod tests {
	use ocap_types::{CapData, KernelRef, Message, VatId};
	use serde_json::json;

	use super::*;
	use crate::testing_store;

	fn send(n: u64) -> RunQueueItem {
		RunQueueItem::Send {
			target: KernelRef::Object(n),
			message: Message::new("m", CapData::value(&json!([])), None),
		}
	}

	#[test]
	fn fifo_order_and_cursors() {
		let mut store = testing_store();
		assert_eq!(store.run_queue_length().unwrap(), 0);
		store.enqueue_run(&send(1)).unwrap();
		store.enqueue_run(&send(2)).unwrap();
		assert_eq!(store.run_queue_length().unwrap(), 2);

		let (index, item) = store.dequeue_run().unwrap().unwrap();
		assert_eq!(index, 1);
		assert_eq!(item, send(1));
		let (index, item) = store.dequeue_run().unwrap().unwrap();
		assert_eq!(index, 2);
		assert_eq!(item, send(2));
		assert!(store.dequeue_run().unwrap().is_none());

		// cursors advance monotonically, row storage is reclaimed
		assert_eq!(store.get(schema::RUN_HEAD).unwrap().as_deref(), Some("3"));
		assert_eq!(store.get(schema::RUN_TAIL).unwrap().as_deref(), Some("3"));
		assert_eq!(store.get("queue.run.1").unwrap(), None);
	}

	#[test]
	fn notify_round_trips_through_queue() {
		let mut store = testing_store();
		let item = RunQueueItem::Notify { vat_id: VatId(2), kp: KernelRef::Promise(7) };
		store.enqueue_run(&item).unwrap();
		assert_eq!(store.run_queue_items().unwrap(), vec![item.clone()]);
		assert_eq!(store.dequeue_run().unwrap().unwrap().1, item);
	}
}
