//! Reassembly of multi-packet property payloads.
//!
//! Transfers are keyed by `(source MUID, request id)`. The header from the
//! first chunk is kept for the whole transfer; continuation chunks append
//! body bytes. Entries idle beyond the configured window are discarded
//! lazily on the next access, which makes their one-shot callbacks simply
//! never fire.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use capwire::Muid;

#[derive(Debug)]
struct Pending {
    header: Vec<u8>,
    body: Vec<u8>,
    last_activity: Instant,
}

/// Accumulator for in-flight multi-chunk property transfers.
#[derive(Debug)]
pub struct ChunkManager {
    pending: HashMap<(Muid, u8), Pending>,
    timeout: Duration,
}

impl ChunkManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    fn evict_stale(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.pending
            .retain(|_, p| now.duration_since(p.last_activity) <= timeout);
    }

    pub fn has_pending(&mut self, now: Instant, source: Muid, request_id: u8) -> bool {
        self.evict_stale(now);
        self.pending.contains_key(&(source, request_id))
    }

    /// Header accumulated so far, if a transfer is in flight.
    pub fn pending_header(&mut self, now: Instant, source: Muid, request_id: u8) -> Option<Bytes> {
        self.evict_stale(now);
        self.pending
            .get(&(source, request_id))
            .map(|p| Bytes::copy_from_slice(&p.header))
    }

    /// Append one non-final chunk. The first chunk's header wins; later
    /// chunks may repeat or omit it.
    pub fn add_chunk(&mut self, now: Instant, source: Muid, request_id: u8, header: &[u8], body: &[u8]) {
        self.evict_stale(now);
        let entry = self.pending.entry((source, request_id)).or_insert_with(|| Pending {
            header: header.to_vec(),
            body: Vec::new(),
            last_activity: now,
        });
        if entry.header.is_empty() && !header.is_empty() {
            entry.header = header.to_vec();
        }
        entry.body.extend_from_slice(body);
        entry.last_activity = now;
    }

    /// Complete a transfer with its final chunk, returning the accumulated
    /// header and body and removing the entry.
    pub fn finish(
        &mut self,
        now: Instant,
        source: Muid,
        request_id: u8,
        final_body: &[u8],
    ) -> (Bytes, Bytes) {
        self.evict_stale(now);
        match self.pending.remove(&(source, request_id)) {
            Some(mut pending) => {
                pending.body.extend_from_slice(final_body);
                (Bytes::from(pending.header), Bytes::from(pending.body))
            }
            None => (Bytes::new(), Bytes::copy_from_slice(final_body)),
        }
    }
}
