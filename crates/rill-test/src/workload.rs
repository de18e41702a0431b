use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rill_common::{RillError, RillResult};
use rill_storage::{Message, MessageInput, PartitionEngine, ReadRequest, WriteAck, WriteRequest};

use crate::harness::SESSION;

/// Returns a payload of `size` bytes that encodes `seq`.
///
/// Payloads shorter than eight bytes carry only the low bytes of `seq`.
pub fn payload(seq: u64, size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(size);
    let header = seq.to_le_bytes();
    buf.put_slice(&header[..size.min(8)]);
    for i in 8..size {
        buf.put_u8((seq as u8).wrapping_add(i as u8));
    }
    buf.freeze()
}

/// Recovers the sequence number of a payload built by [`payload`].
pub fn seq_of(payload: &[u8]) -> Option<u64> {
    let header: [u8; 8] = payload.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(header))
}

/// Returns `count` messages of `size` bytes numbered from `first`.
pub fn messages(first: u64, count: usize, size: usize) -> Vec<MessageInput> {
    (first..first + count as u64)
        .map(|seq| MessageInput::new(payload(seq, size)).with_uint16((seq % 1024) as u16))
        .collect()
}

/// Returns `count` sizes in `min..=max` from a seeded generator.
pub fn random_sizes(seed: u64, count: usize, min: usize, max: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(min..=max)).collect()
}

/// Writes `count` messages of `size` bytes as one request.
pub fn write_batch(
    engine: &PartitionEngine,
    first: u64,
    count: usize,
    size: usize,
) -> RillResult<WriteAck> {
    engine
        .add_message(WriteRequest::new(messages(first, count, size)))
        .into_result()
}

/// Writes `count` messages of `size` bytes, one request each.
pub fn write_each(
    engine: &PartitionEngine,
    first: u64,
    count: usize,
    size: usize,
) -> RillResult<()> {
    for seq in first..first + count as u64 {
        write_batch(engine, seq, 1, size)?;
    }
    Ok(())
}

/// Reads from `start` until the partition reports no more data.
///
/// Data-loss errors end the scan and are returned to the caller.
pub fn read_all(engine: &PartitionEngine, client: &str, start: u64) -> RillResult<Vec<Message>> {
    let mut out = Vec::new();
    let mut next = start;
    loop {
        let reply = engine.get_message(ReadRequest::new(SESSION, client, next));
        match reply.result {
            Ok(response) => {
                if response.next_msg_id <= next {
                    return Err(RillError::internal(format!(
                        "read at {next} made no progress"
                    )));
                }
                next = response.next_msg_id;
                out.extend(response.messages);
            }
            Err(RillError::NoData { .. }) => return Ok(out),
            Err(err) => return Err(err),
        }
    }
}

/// Returns the ids of `messages`.
pub fn ids(messages: &[Message]) -> Vec<u64> {
    messages.iter().map(|m| m.msg_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_encodes_sequence() {
        let p = payload(42, 32);
        assert_eq!(p.len(), 32);
        assert_eq!(seq_of(&p), Some(42));
        assert_eq!(payload(42, 32), p);
        assert_eq!(payload(7, 3).len(), 3);
        assert_eq!(seq_of(&payload(7, 3)), None);
    }

    #[test]
    fn test_random_sizes_are_seeded() {
        let a = random_sizes(9, 50, 10, 20);
        assert_eq!(a, random_sizes(9, 50, 10, 20));
        assert!(a.iter().all(|s| (10..=20).contains(s)));
    }
}
