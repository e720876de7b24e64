// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Key construction for the kernel KV namespace.

use ocap_types::{KernelRef, VatId, VatRef};

pub const RUN_HEAD: &str = "queue.run.head";
pub const RUN_TAIL: &str = "queue.run.tail";
pub const GC_ACTIONS: &str = "gcActions";
pub const REAP_QUEUE: &str = "reapQueue";
pub const TERMINATED: &str = "vats.terminated";
pub const NEXT_OBJECT_ID: &str = "nextObjectId";
pub const NEXT_PROMISE_ID: &str = "nextPromiseId";
pub const NEXT_VAT_ID: &str = "nextVatId";
pub const NEXT_REMOTE_ID: &str = "nextRemoteId";
pub const SUBCLUSTERS: &str = "subclusters";
pub const NEXT_SUBCLUSTER_ID: &str = "nextSubclusterId";
pub const VAT_SUBCLUSTER_MAP: &str = "vatToSubclusterMap";
pub const INITIALIZED: &str = "initialized";

/// First-boot rows, in write (and therefore dump) order.
pub const FIRST_BOOT: [(&str, &str); 13] = [
	(RUN_HEAD, "1"),
	(RUN_TAIL, "1"),
	(GC_ACTIONS, "[]"),
	(REAP_QUEUE, "[]"),
	(TERMINATED, "[]"),
	(NEXT_OBJECT_ID, "1"),
	(NEXT_PROMISE_ID, "1"),
	(NEXT_VAT_ID, "1"),
	(NEXT_REMOTE_ID, "1"),
	(SUBCLUSTERS, "[]"),
	(NEXT_SUBCLUSTER_ID, "1"),
	(VAT_SUBCLUSTER_MAP, "{}"),
	(INITIALIZED, "true"),
];

pub fn run_item(index: u64) -> String {
	format!("queue.run.{index}")
}

pub fn object_owner(kref: KernelRef) -> String {
	format!("{kref}.owner")
}

pub fn object_refcount(kref: KernelRef) -> String {
	format!("{kref}.refCount")
}

pub fn object_revoked(kref: KernelRef) -> String {
	format!("{kref}.revoked")
}

pub fn promise_state(kref: KernelRef) -> String {
	format!("{kref}.state")
}

pub fn promise_decider(kref: KernelRef) -> String {
	format!("{kref}.decider")
}

pub fn promise_subscribers(kref: KernelRef) -> String {
	format!("{kref}.subscribers")
}

pub fn promise_queue(kref: KernelRef) -> String {
	format!("{kref}.queue")
}

pub fn promise_value(kref: KernelRef) -> String {
	format!("{kref}.value")
}

pub fn promise_refcount(kref: KernelRef) -> String {
	format!("{kref}.refCount")
}

pub fn clist_by_kref(vat: VatId, kref: KernelRef) -> String {
	format!("{vat}.c.{kref}")
}

pub fn clist_by_vref(vat: VatId, vref: VatRef) -> String {
	format!("{vat}.c.{vref}")
}

/// Prefix under which both c-list directions of a vat live.
pub fn clist_prefix(vat: VatId) -> String {
	format!("{vat}.c.")
}

pub fn next_import_object_id(vat: VatId) -> String {
	format!("{vat}.o.nextId")
}

pub fn next_import_promise_id(vat: VatId) -> String {
	format!("{vat}.p.nextId")
}

pub fn vat_config(vat: VatId) -> String {
	format!("vatConfig.{vat}")
}

pub const VAT_CONFIG_PREFIX: &str = "vatConfig.";

// per-vat sub-store keys
pub const VATSTORE_PREFIX: &str = "vs.";
pub const TRANSCRIPT_PREFIX: &str = "t.";
pub const TRANSCRIPT_END: &str = "t.endPos";
pub const REAP_COUNTDOWN: &str = "reapCountdown";

pub fn vatstore_key(key: &str) -> String {
	format!("{VATSTORE_PREFIX}{key}")
}

pub fn transcript_key(index: u64) -> String {
	format!("{TRANSCRIPT_PREFIX}{index:08}")
}
