//! Sub-region node pool and membership state machine.
//!
//! A fixed population of cache nodes, allocated once at probe time, cycles
//! between three disjoint collections: the free pool (status `Empty`), the
//! refill queue plus active index (status `Refilling`), and the active
//! index alone (status `Filled`). `|free| + |active|` equals the capacity
//! at every instant; a sub-region id lives in at most one collection.
//!
//! The struct itself is not thread-safe. The controller wraps it in a
//! single mutex and keeps every critical section short — list and map
//! edits, one table copy — never device I/O.

use crate::geometry::ENTRY_SIZE;
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Nodes carved out of each backing allocation.
const NODES_PER_BLOCK: usize = 32;

/// Lifecycle state of one cache node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// In the free pool; buffer contents meaningless.
    Empty,
    /// Claimed for a sub-region, table not yet fetched. Misses on lookup.
    Refilling,
    /// Table fetched and queryable.
    Filled,
}

#[derive(Debug)]
struct CacheNode {
    subregion_id: u32,
    status: NodeStatus,
    /// Bumped every time the node is recycled through the free pool.
    /// Refill tickets carry the value they observed, so a result for a
    /// node that was inactivated (or re-claimed under a new id) mid-flight
    /// is recognized and dropped.
    generation: u64,
    block: usize,
    offset: usize,
}

/// Outcome of an activation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A free node was claimed and queued for refill.
    Queued,
    /// The id is already refilling; nothing to do.
    AlreadyPending,
    /// The id is already filled and serving lookups; nothing to do.
    AlreadyFilled,
    /// Free pool exhausted; the request is dropped (backpressure, not an
    /// error — the id simply stays on the always-correct logical path).
    Dropped,
}

/// Claim on a node popped from the refill queue, held by the worker across
/// the device read. Valid only as long as the node keeps the same identity.
#[derive(Debug, Clone, Copy)]
pub struct RefillTicket {
    slot: usize,
    /// Sub-region whose table the worker should fetch.
    pub subregion_id: u32,
    generation: u64,
}

/// Free/active/queued population counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Nodes in the free pool.
    pub free: usize,
    /// Nodes in the active index (refilling or filled).
    pub active: usize,
    /// Nodes queued for a refill read (subset of `active`).
    pub queued: usize,
}

/// The node pool and its three membership collections.
pub struct SubregionCache {
    table_size: usize,
    blocks: Vec<Box<[u8]>>,
    nodes: Vec<CacheNode>,
    free: Vec<usize>,
    active: FxHashMap<u32, usize>,
    refill: VecDeque<usize>,
}

fn alloc_block(len: usize) -> Result<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::AllocationFailed { needed: len })?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}

impl SubregionCache {
    /// Allocate a pool of `capacity` nodes, each backed by a
    /// `table_size`-byte slice of a shared block.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a zero capacity or table size;
    /// [`Error::AllocationFailed`] if any backing block cannot be
    /// allocated, in which case everything already allocated is released.
    pub fn new(capacity: usize, table_size: usize) -> Result<Self> {
        if capacity == 0 || table_size == 0 {
            return Err(Error::InvalidInput(format!(
                "capacity {capacity} and table size {table_size} must be nonzero"
            )));
        }

        let mut blocks = Vec::new();
        let mut nodes = Vec::with_capacity(capacity);
        let mut remaining = capacity;
        while remaining > 0 {
            let in_block = remaining.min(NODES_PER_BLOCK);
            let block = blocks.len();
            blocks.push(alloc_block(in_block * table_size)?);
            for i in 0..in_block {
                nodes.push(CacheNode {
                    subregion_id: 0,
                    status: NodeStatus::Empty,
                    generation: 0,
                    block,
                    offset: i * table_size,
                });
            }
            remaining -= in_block;
        }

        let free = (0..capacity).rev().collect();
        Ok(Self {
            table_size,
            blocks,
            nodes,
            free,
            active: FxHashMap::default(),
            refill: VecDeque::new(),
        })
    }

    /// Total node count, fixed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Byte size of one sub-region table.
    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table_size
    }

    /// Current population counts.
    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            free: self.free.len(),
            active: self.active.len(),
            queued: self.refill.len(),
        }
    }

    /// Number of nodes awaiting a refill read.
    #[must_use]
    pub fn refill_len(&self) -> usize {
        self.refill.len()
    }

    /// Status of the node serving `id`, if any is active for it.
    #[must_use]
    pub fn status_of(&self, id: u32) -> Option<NodeStatus> {
        self.active.get(&id).map(|&slot| self.nodes[slot].status)
    }

    /// Request caching of sub-region `id`.
    ///
    /// Idempotent: an id that is already refilling or filled is left
    /// untouched. With the free pool empty the request is dropped.
    pub fn activate(&mut self, id: u32) -> Activation {
        if let Some(&slot) = self.active.get(&id) {
            return match self.nodes[slot].status {
                NodeStatus::Refilling => Activation::AlreadyPending,
                _ => Activation::AlreadyFilled,
            };
        }
        let Some(slot) = self.free.pop() else {
            return Activation::Dropped;
        };
        let node = &mut self.nodes[slot];
        node.subregion_id = id;
        node.status = NodeStatus::Refilling;
        self.active.insert(id, slot);
        self.refill.push_back(slot);
        Activation::Queued
    }

    /// Evict sub-region `id`: drop it from the index and the refill queue,
    /// reset the node and return it to the free pool. Returns `false` when
    /// the id was not active.
    ///
    /// The index entry is removed before the node reaches the free pool,
    /// so a node handed out again can never still be found under its old
    /// id.
    pub fn inactivate(&mut self, id: u32) -> bool {
        let Some(slot) = self.active.remove(&id) else {
            return false;
        };
        self.refill.retain(|&queued| queued != slot);
        let node = &mut self.nodes[slot];
        node.status = NodeStatus::Empty;
        node.generation += 1;
        self.free.push(slot);
        true
    }

    /// Pop the next node awaiting refill. The node stays `Refilling` in
    /// the active index; the ticket pins its identity for the duration of
    /// the device read.
    pub fn pop_refill(&mut self) -> Option<RefillTicket> {
        let slot = self.refill.pop_front()?;
        let node = &self.nodes[slot];
        debug_assert_eq!(node.status, NodeStatus::Refilling);
        Some(RefillTicket {
            slot,
            subregion_id: node.subregion_id,
            generation: node.generation,
        })
    }

    fn ticket_current(&self, ticket: &RefillTicket) -> bool {
        let node = &self.nodes[ticket.slot];
        node.generation == ticket.generation
            && node.subregion_id == ticket.subregion_id
            && node.status == NodeStatus::Refilling
    }

    /// Commit a fetched table for a ticket. Returns `false` — and writes
    /// nothing — when the node was recycled while the read was in flight
    /// or the payload has the wrong size.
    pub fn complete_refill(&mut self, ticket: &RefillTicket, table: &[u8]) -> bool {
        if !self.ticket_current(ticket) || table.len() != self.table_size {
            return false;
        }
        let (block, offset) = {
            let node = &self.nodes[ticket.slot];
            (node.block, node.offset)
        };
        self.blocks[block][offset..offset + self.table_size].copy_from_slice(table);
        self.nodes[ticket.slot].status = NodeStatus::Filled;
        true
    }

    /// Put a ticket whose read failed back on the queue tail for a later
    /// pass. No-op (returns `false`) when the node was recycled meanwhile.
    pub fn requeue(&mut self, ticket: &RefillTicket) -> bool {
        if !self.ticket_current(ticket) {
            return false;
        }
        self.refill.push_back(ticket.slot);
        true
    }

    /// Look up the cached PPN for (`id`, `entry`). Hits only on `Filled`
    /// nodes; `Refilling` and absent ids both miss.
    #[must_use]
    pub fn lookup(&self, id: u32, entry: usize) -> Option<u64> {
        let &slot = self.active.get(&id)?;
        let node = &self.nodes[slot];
        if node.status != NodeStatus::Filled {
            return None;
        }
        let base = node.offset + entry * ENTRY_SIZE;
        let bytes = self.blocks[node.block].get(base..base + ENTRY_SIZE)?;
        let mut raw = [0u8; ENTRY_SIZE];
        raw.copy_from_slice(bytes);
        Some(u64::from_be_bytes(raw))
    }
}
