//! The in-memory message ring of one partition.
//!
//! Payload bytes are packed back to back into blocks borrowed from the
//! partition's buffer pool; a payload may straddle blocks. Messages leave
//! from the front only, and a block goes back to the pool once no buffered
//! message touches it.
//!
//! ```text
//!   first_block                                write_pos
//!   │                                          │
//!   ▼                                          ▼
//!   ┌──────────┬──────────┬──────────┬──────────┬──────────┐
//!   │ m5 │ m6  │ m6 │ m7 ...        │ ... m12  │  free    │
//!   └──────────┴──────────┴──────────┴──────────┴──────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use rill_buffer::{Block, BufferPool};

use crate::message::{Message, PreparedMessage};

#[derive(Debug, Clone, Copy)]
struct Slot {
    msg_id: u64,
    timestamp: i64,
    uint16_payload: u16,
    compressed: bool,
    pos: u64,
    len: usize,
}

/// Messages evicted by one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    /// Messages dropped.
    pub messages: usize,
    /// Payload bytes dropped.
    pub bytes: usize,
    /// Blocks returned to the pool.
    pub blocks: usize,
}

/// Buffered messages of one partition.
pub struct MemoryRing {
    pool: Arc<BufferPool>,
    block_size: usize,
    blocks: VecDeque<Block>,
    first_block: u64,
    slots: VecDeque<Slot>,
    write_pos: u64,
    next_id: u64,
    last_timestamp: i64,
    bytes: usize,
}

impl MemoryRing {
    /// Creates an empty ring whose next message gets `next_id`.
    pub fn new(pool: Arc<BufferPool>, next_id: u64, last_timestamp: i64) -> Self {
        let block_size = pool.block_size();
        Self {
            pool,
            block_size,
            blocks: VecDeque::new(),
            first_block: 0,
            slots: VecDeque::new(),
            write_pos: 0,
            next_id,
            last_timestamp,
            bytes: 0,
        }
    }

    fn capacity_end(&self) -> u64 {
        (self.first_block + self.blocks.len() as u64) * self.block_size as u64
    }

    /// Returns the blocks that must be added before `bytes` more payload
    /// bytes fit.
    pub fn blocks_needed(&self, bytes: usize) -> usize {
        let free = self.capacity_end().saturating_sub(self.write_pos) as usize;
        if bytes <= free {
            0
        } else {
            (bytes - free).div_ceil(self.block_size)
        }
    }

    /// Allocates blocks until `bytes` more payload bytes fit.
    ///
    /// On exhaustion returns the number of blocks still missing; blocks
    /// already allocated stay in the ring.
    pub fn reserve(&mut self, bytes: usize) -> Result<(), usize> {
        let mut missing = self.blocks_needed(bytes);
        while missing > 0 {
            match self.pool.allocate() {
                Some(block) => {
                    self.blocks.push_back(block);
                    missing -= 1;
                }
                None => return Err(missing),
            }
        }
        Ok(())
    }

    /// Appends messages, assigning consecutive ids and the timestamp
    /// `max(now, last timestamp)`. Space must have been reserved.
    ///
    /// Returns the id of the first appended message.
    pub fn append(&mut self, messages: &[PreparedMessage], now: i64) -> u64 {
        let first_id = self.next_id;
        let timestamp = now.max(self.last_timestamp);
        for message in messages {
            let pos = self.write_pos;
            self.write_bytes(pos, &message.payload);
            self.slots.push_back(Slot {
                msg_id: self.next_id,
                timestamp,
                uint16_payload: message.uint16_payload,
                compressed: message.compressed,
                pos,
                len: message.len(),
            });
            self.write_pos += message.len() as u64;
            self.bytes += message.len();
            self.next_id += 1;
        }
        self.last_timestamp = timestamp;
        first_id
    }

    fn locate(&self, pos: u64) -> (usize, usize) {
        let block_size = self.block_size as u64;
        ((pos / block_size - self.first_block) as usize, (pos % block_size) as usize)
    }

    fn write_bytes(&mut self, mut pos: u64, mut data: &[u8]) {
        while !data.is_empty() {
            let (index, offset) = self.locate(pos);
            let block = &mut self.blocks[index];
            let take = (self.block_size - offset).min(data.len());
            block[offset..offset + take].copy_from_slice(&data[..take]);
            data = &data[take..];
            pos += take as u64;
        }
    }

    fn read_bytes(&self, mut pos: u64, len: usize) -> Bytes {
        let mut out = BytesMut::with_capacity(len);
        while out.len() < len {
            let (index, offset) = self.locate(pos);
            let take = (self.block_size - offset).min(len - out.len());
            out.extend_from_slice(&self.blocks[index][offset..offset + take]);
            pos += take as u64;
        }
        out.freeze()
    }

    fn to_message(&self, slot: &Slot) -> Message {
        Message {
            msg_id: slot.msg_id,
            timestamp: slot.timestamp,
            uint16_payload: slot.uint16_payload,
            compressed: slot.compressed,
            payload: self.read_bytes(slot.pos, slot.len),
        }
    }

    /// Returns the message with `msg_id` if buffered.
    pub fn get(&self, msg_id: u64) -> Option<Message> {
        let index = msg_id.checked_sub(self.front_id())? as usize;
        self.slots.get(index).map(|slot| self.to_message(slot))
    }

    /// Returns buffered messages starting at `msg_id`, visiting them in order
    /// until `visit` returns false.
    pub fn scan(&self, msg_id: u64, mut visit: impl FnMut(Message) -> bool) {
        let start = msg_id.saturating_sub(self.front_id()) as usize;
        for slot in self.slots.iter().skip(start) {
            if !visit(self.to_message(slot)) {
                break;
            }
        }
    }

    /// Returns copies of every buffered message from `msg_id` on.
    pub fn messages_from(&self, msg_id: u64) -> Vec<Message> {
        let mut messages = Vec::new();
        self.scan(msg_id, |message| {
            messages.push(message);
            true
        });
        messages
    }

    /// Returns the payload bytes buffered from `msg_id` on.
    pub fn bytes_from(&self, msg_id: u64) -> usize {
        let start = msg_id.saturating_sub(self.front_id()) as usize;
        self.slots.iter().skip(start).map(|slot| slot.len).sum()
    }

    /// Returns the first buffered id whose timestamp is at least `timestamp`.
    pub fn first_id_at_or_after(&self, timestamp: i64) -> Option<u64> {
        let index = self.slots.partition_point(|slot| slot.timestamp < timestamp);
        self.slots.get(index).map(|slot| slot.msg_id)
    }

    /// Drops messages with ids below `msg_id`.
    pub fn evict_before(&mut self, msg_id: u64) -> Evicted {
        self.evict_while(|slot, _| slot.msg_id < msg_id)
    }

    /// Drops messages with ids below `limit` until at least `bytes` payload
    /// bytes are gone.
    pub fn evict_bytes(&mut self, limit: u64, bytes: usize) -> Evicted {
        self.evict_while(|slot, evicted| slot.msg_id < limit && evicted < bytes)
    }

    fn evict_while(&mut self, mut keep_going: impl FnMut(&Slot, usize) -> bool) -> Evicted {
        let mut evicted = Evicted::default();
        while let Some(slot) = self.slots.front() {
            if !keep_going(slot, evicted.bytes) {
                break;
            }
            evicted.messages += 1;
            evicted.bytes += slot.len;
            self.bytes -= slot.len;
            self.slots.pop_front();
        }
        evicted.blocks = self.release_blocks();
        evicted
    }

    fn release_blocks(&mut self) -> usize {
        let keep_from_pos = self.slots.front().map_or(self.write_pos, |slot| slot.pos);
        let keep_from = keep_from_pos / self.block_size as u64;
        let mut released = 0;
        while self.first_block < keep_from {
            match self.blocks.pop_front() {
                Some(block) => {
                    self.pool.free(block);
                    released += 1;
                    self.first_block += 1;
                }
                None => {
                    self.first_block = keep_from;
                    break;
                }
            }
        }
        released
    }

    /// Drops everything and returns all blocks.
    pub fn clear(&mut self) -> Evicted {
        let evicted = Evicted {
            messages: self.slots.len(),
            bytes: self.bytes,
            blocks: self.blocks.len(),
        };
        self.slots.clear();
        self.bytes = 0;
        self.pool.free_all(self.blocks.drain(..));
        // Restart on a block boundary so the next append gets a fresh block.
        let block_size = self.block_size as u64;
        self.write_pos = self.write_pos.div_ceil(block_size) * block_size;
        self.first_block = self.write_pos / block_size;
        evicted
    }

    /// Returns the id of the oldest buffered message, or the next id when
    /// empty.
    pub fn front_id(&self) -> u64 {
        self.slots.front().map_or(self.next_id, |slot| slot.msg_id)
    }

    /// Returns the timestamp of the oldest buffered message.
    pub fn front_timestamp(&self) -> Option<i64> {
        self.slots.front().map(|slot| slot.timestamp)
    }

    /// Returns the id the next appended message gets.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Returns the newest timestamp handed out.
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Returns the number of buffered messages.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the buffered payload bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the number of blocks held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Drop for MemoryRing {
    fn drop(&mut self) {
        self.pool.free_all(self.blocks.drain(..));
    }
}

impl std::fmt::Debug for MemoryRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRing")
            .field("front_id", &self.front_id())
            .field("next_id", &self.next_id)
            .field("messages", &self.slots.len())
            .field("bytes", &self.bytes)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
