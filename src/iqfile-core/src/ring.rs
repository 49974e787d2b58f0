// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single-producer / multi-consumer byte ring for the IQ stream.
//!
//! One writer (the capture engine) publishes sample bytes; any number of
//! readers (file writer, HTTP streams, meters) follow with independent
//! cursors. Cursors are unbounded 64-bit byte counters; storage positions
//! wrap modulo the power-of-two capacity only when indexing.
//!
//! The producer never blocks on a reader. A reader that falls more than the
//! capacity behind is slipped forward to `producer - (capacity - margin)`
//! and its slip counter incremented; the margin (about one maximum frame)
//! keeps a slipped reader's next copy out of the producer's write span.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of one [`RingReader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    /// Bytes copied into the caller's buffer.
    pub n: usize,
    /// Bytes skipped since the previous read because this reader was
    /// slipped by the producer. Zero for a reader that keeps up.
    pub slipped: u64,
    /// The ring is closed and fully drained; no more bytes will arrive.
    pub eof: bool,
}

struct ReaderSlot {
    cursor: AtomicU64,
    slips: AtomicU64,
}

struct Shared {
    storage: Box<[UnsafeCell<u8>]>,
    capacity: u64,
    mask: u64,
    margin: u64,
    produced: AtomicU64,
    closed: AtomicBool,
    readers: Mutex<HashMap<u64, Arc<ReaderSlot>>>,
    next_reader_id: AtomicU64,
    gate: Mutex<u64>,
    cond: Condvar,
}

// Readers copy published bytes through the raw storage pointer while the
// producer writes ahead of them. A reader whose span could overlap the write
// window is slipped first, by the producer on commit or by its own clamp in
// `read`; a stale copy is discarded when the cursor CAS fails.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn notify(&self) {
        let mut gen = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        *gen = gen.wrapping_add(1);
        drop(gen);
        self.cond.notify_all();
    }

    fn data(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    /// Copy `dst.len()` bytes starting at unbounded position `pos` into
    /// `dst`, splitting at the wrap point.
    unsafe fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let cap = self.capacity as usize;
        let start = (pos & self.mask) as usize;
        let len = dst.len();
        let first = len.min(cap - start);
        let src = self.data() as *const u8;
        std::ptr::copy_nonoverlapping(src.add(start), dst.as_mut_ptr(), first);
        if first < len {
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr().add(first), len - first);
        }
    }

}

/// Shared handle to the ring; clones of the [`Arc`] subscribe readers.
pub struct IqRing {
    shared: Arc<Shared>,
}

impl IqRing {
    /// Create a ring of at least `min_capacity` bytes (rounded up to the next
    /// power of two) with the given slip margin. Returns the unique producer
    /// and the shared subscription handle.
    pub fn with_capacity(min_capacity: usize, margin: usize) -> (RingProducer, Arc<IqRing>) {
        let capacity = min_capacity.max(2).next_power_of_two();
        assert!(
            margin < capacity,
            "slip margin must be smaller than the ring capacity"
        );
        let storage: Box<[UnsafeCell<u8>]> =
            (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
        let shared = Arc::new(Shared {
            storage,
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            margin: margin as u64,
            produced: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            readers: Mutex::new(HashMap::new()),
            next_reader_id: AtomicU64::new(0),
            gate: Mutex::new(0),
            cond: Condvar::new(),
        });
        let producer = RingProducer {
            shared: shared.clone(),
        };
        (producer, Arc::new(IqRing { shared }))
    }

    /// Register a reader starting at the current producer cursor; late
    /// subscribers see only future bytes.
    pub fn subscribe(&self) -> RingReader {
        let start = self.shared.produced.load(Ordering::Acquire);
        let slot = Arc::new(ReaderSlot {
            cursor: AtomicU64::new(start),
            slips: AtomicU64::new(0),
        });
        let id = self.shared.next_reader_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, slot.clone());
        RingReader {
            shared: self.shared.clone(),
            id,
            slot,
            expected: start,
        }
    }

    /// Total bytes committed so far.
    pub fn produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// The single writer half. Not clonable; owned by the capture engine.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Directly writable span of up to `n` bytes at the producer cursor.
    /// The span is cut short at the wrap point; call again after `commit`
    /// to fill the remainder.
    pub fn reserve(&mut self, n: usize) -> &mut [u8] {
        let cap = self.shared.capacity as usize;
        let start = (self.shared.produced.load(Ordering::Relaxed) & self.shared.mask) as usize;
        let len = n.min(cap - start);
        unsafe { std::slice::from_raw_parts_mut(self.shared.data().add(start), len) }
    }

    /// Publish `n` bytes previously filled through [`reserve`]. Never
    /// blocks; lagging readers are slipped instead.
    ///
    /// [`reserve`]: RingProducer::reserve
    pub fn commit(&mut self, n: usize) {
        let new_pos = self.shared.produced.load(Ordering::Relaxed) + n as u64;
        self.shared.produced.store(new_pos, Ordering::Release);
        self.slip_laggards(new_pos);
        self.shared.notify();
    }

    /// Publish a block of bytes, reserving and committing across the wrap
    /// point as needed.
    pub fn write(&mut self, mut bytes: &[u8]) {
        // Oversized blocks keep only their tail, like any reader that lagged
        // a full capacity behind would.
        let cap = self.shared.capacity as usize;
        if bytes.len() > cap {
            bytes = &bytes[bytes.len() - cap..];
        }
        while !bytes.is_empty() {
            let span = self.reserve(bytes.len());
            let len = span.len();
            span.copy_from_slice(&bytes[..len]);
            self.commit(len);
            bytes = &bytes[len..];
        }
    }

    fn slip_laggards(&self, produced: u64) {
        if produced <= self.shared.capacity {
            return;
        }
        let readers = self.shared.readers.lock().unwrap_or_else(|e| e.into_inner());
        for slot in readers.values() {
            let target = produced - (self.shared.capacity - self.shared.margin);
            let mut cur = slot.cursor.load(Ordering::Acquire);
            while produced.wrapping_sub(cur) > self.shared.capacity {
                match slot.cursor.compare_exchange_weak(
                    cur,
                    target,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.slips.fetch_add(target - cur, Ordering::Relaxed);
                        break;
                    }
                    Err(actual) => cur = actual,
                }
            }
        }
    }

    /// Mark end of stream; blocked readers wake, drain, then observe EOF.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify();
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// An independent consumer cursor over the ring.
pub struct RingReader {
    shared: Arc<Shared>,
    id: u64,
    slot: Arc<ReaderSlot>,
    expected: u64,
}

impl RingReader {
    /// Copy up to `buf.len()` available bytes, blocking up to `timeout` for
    /// data. `n == 0` with `eof == false` means the wait timed out.
    pub fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let cur = self.slot.cursor.load(Ordering::Acquire);
            let slipped = cur.saturating_sub(self.expected);
            let produced = self.shared.produced.load(Ordering::Acquire);
            let avail = produced.wrapping_sub(cur);
            if avail > self.shared.capacity {
                // The producer published past our whole window but its slip
                // correction has not reached this slot yet; clamp to the
                // same target ourselves before touching storage.
                let target = produced - (self.shared.capacity - self.shared.margin);
                if self
                    .slot
                    .cursor
                    .compare_exchange(cur, target, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.slot.slips.fetch_add(target - cur, Ordering::Relaxed);
                }
                continue;
            }
            if avail > 0 && !buf.is_empty() {
                let len = (avail as usize).min(buf.len());
                unsafe { self.shared.copy_out(cur, &mut buf[..len]) };
                // If the producer slipped us mid-copy the bytes are torn;
                // the failed CAS discards them and the next pass reports
                // the slip.
                match self.slot.cursor.compare_exchange(
                    cur,
                    cur + len as u64,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.expected = cur + len as u64;
                        return ReadStatus {
                            n: len,
                            slipped,
                            eof: false,
                        };
                    }
                    Err(_) => continue,
                }
            }
            if self.shared.closed.load(Ordering::Acquire) {
                self.expected = cur;
                return ReadStatus {
                    n: 0,
                    slipped,
                    eof: true,
                };
            }
            let now = Instant::now();
            if now >= deadline {
                self.expected = cur;
                return ReadStatus {
                    n: 0,
                    slipped,
                    eof: false,
                };
            }
            let gen = self.shared.gate.lock().unwrap_or_else(|e| e.into_inner());
            // Re-check under the gate so a commit between the loads above and
            // this lock is not slept through.
            if self.shared.produced.load(Ordering::Acquire) != produced
                || self.shared.closed.load(Ordering::Acquire)
            {
                continue;
            }
            let _unused = self
                .shared
                .cond
                .wait_timeout(gen, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Bytes this reader currently lags behind the producer.
    pub fn lag(&self) -> u64 {
        self.shared
            .produced
            .load(Ordering::Acquire)
            .wrapping_sub(self.slot.cursor.load(Ordering::Acquire))
    }

    /// Total bytes skipped over this reader's lifetime.
    pub fn slip_count(&self) -> u64 {
        self.slot.slips.load(Ordering::Relaxed)
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        self.shared
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const POLL: Duration = Duration::from_millis(10);

    fn ring(cap: usize, margin: usize) -> (RingProducer, Arc<IqRing>) {
        IqRing::with_capacity(cap, margin)
    }

    #[test]
    fn capacity_rounds_to_power_of_two() {
        let (_p, r) = ring(1000, 8);
        assert_eq!(r.capacity(), 1024);
    }

    #[test]
    fn reader_sees_exactly_what_was_written() {
        let (mut p, r) = ring(64, 8);
        let mut reader = r.subscribe();
        p.write(&[1, 2, 3, 4]);
        p.write(&[5, 6]);
        let mut buf = [0u8; 16];
        let st = reader.read(&mut buf, POLL);
        assert_eq!(st, ReadStatus { n: 6, slipped: 0, eof: false });
        assert_eq!(&buf[..6], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn wraparound_preserves_byte_order() {
        let (mut p, r) = ring(16, 2);
        let mut reader = r.subscribe();
        let mut buf = [0u8; 16];
        // Fill most of the ring, drain, then write across the wrap point.
        p.write(&(0u8..12).collect::<Vec<_>>());
        assert_eq!(reader.read(&mut buf, POLL).n, 12);
        p.write(&(100u8..110).collect::<Vec<_>>());
        let st = reader.read(&mut buf, POLL);
        assert_eq!(st.n, 10);
        assert_eq!(&buf[..10], &(100u8..110).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn reserve_is_cut_at_the_wrap_point() {
        let (mut p, r) = ring(16, 2);
        let mut reader = r.subscribe();
        let mut buf = [0u8; 16];
        // Move the cursor to position 12, then ask for more than the free
        // span to the wrap point.
        p.write(&[0; 12]);
        assert_eq!(reader.read(&mut buf, POLL).n, 12);
        let span = p.reserve(10);
        assert_eq!(span.len(), 4);
        span.copy_from_slice(&[1, 2, 3, 4]);
        p.commit(4);
        let span = p.reserve(6);
        assert_eq!(span.len(), 6);
        span.copy_from_slice(&[5, 6, 7, 8, 9, 10]);
        p.commit(6);
        let st = reader.read(&mut buf, POLL);
        assert_eq!(st.n, 10);
        assert_eq!(&buf[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn late_subscriber_sees_only_future_bytes() {
        let (mut p, r) = ring(64, 8);
        p.write(&[9; 10]);
        let mut reader = r.subscribe();
        p.write(&[7; 4]);
        let mut buf = [0u8; 16];
        let st = reader.read(&mut buf, POLL);
        assert_eq!(st.n, 4);
        assert_eq!(&buf[..4], &[7; 4]);
    }

    #[test]
    fn producer_never_blocks_and_laggard_is_slipped() {
        let (mut p, r) = ring(64, 8);
        let mut reader = r.subscribe();
        // 3x capacity without a single read; each write returns immediately.
        for i in 0..24u8 {
            p.write(&[i; 8]);
        }
        let mut buf = [0u8; 192];
        let st = reader.read(&mut buf, POLL);
        assert!(st.slipped > 0);
        assert_eq!(st.slipped, reader.slip_count());
        // Bounded lag: the reader was reset inside the capacity window.
        assert!(st.n as u64 <= r.capacity() as u64);
        // The bytes received are the tail of the stream, not a stale mix.
        let produced = r.produced();
        let first_kept = produced - st.n as u64;
        assert_eq!(buf[0], (first_kept / 8) as u8);
    }

    #[test]
    fn slipped_plus_read_equals_committed() {
        let (mut p, r) = ring(32, 4);
        let mut reader = r.subscribe();
        for i in 0..10u8 {
            p.write(&[i; 16]);
        }
        p.close();
        let mut buf = [0u8; 64];
        let mut total_read = 0u64;
        let mut total_slipped = 0u64;
        loop {
            let st = reader.read(&mut buf, POLL);
            total_read += st.n as u64;
            total_slipped += st.slipped;
            if st.eof {
                break;
            }
        }
        assert_eq!(total_read + total_slipped, r.produced());
    }

    #[test]
    fn close_wakes_reader_with_eof_after_drain() {
        let (mut p, r) = ring(64, 8);
        let mut reader = r.subscribe();
        p.write(&[1, 2, 3]);
        p.close();
        let mut buf = [0u8; 8];
        let st = reader.read(&mut buf, POLL);
        assert_eq!(st.n, 3);
        assert!(!st.eof);
        let st = reader.read(&mut buf, POLL);
        assert!(st.eof);
        assert_eq!(st.n, 0);
    }

    #[test]
    fn independent_cursors() {
        let (mut p, r) = ring(64, 8);
        let mut a = r.subscribe();
        let mut b = r.subscribe();
        p.write(&[42; 8]);
        let mut buf = [0u8; 8];
        assert_eq!(a.read(&mut buf, POLL).n, 8);
        assert_eq!(b.read(&mut buf, POLL).n, 8);
        // Draining one cursor does not starve the other.
        p.write(&[43; 8]);
        assert_eq!(b.read(&mut buf, POLL).n, 8);
        assert_eq!(a.read(&mut buf, POLL).n, 8);
    }

    #[test]
    fn read_timeout_returns_empty() {
        let (_p, r) = ring(64, 8);
        let mut reader = r.subscribe();
        let mut buf = [0u8; 8];
        let st = reader.read(&mut buf, Duration::from_millis(20));
        assert_eq!(st, ReadStatus { n: 0, slipped: 0, eof: false });
    }

    #[test]
    fn threaded_well_behaved_consumer_loses_nothing() {
        let (mut p, r) = ring(1 << 14, 64);
        let mut reader = r.subscribe();
        let total: u64 = 1 << 16;
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 512];
            let mut seen = 0u64;
            let mut next_expected = 0u8;
            loop {
                let st = reader.read(&mut buf, Duration::from_millis(100));
                assert_eq!(st.slipped, 0, "well-behaved reader must not slip");
                for &byte in &buf[..st.n] {
                    assert_eq!(byte, next_expected);
                    next_expected = next_expected.wrapping_add(1);
                }
                seen += st.n as u64;
                if st.eof {
                    break;
                }
            }
            seen
        });
        let mut value = 0u8;
        let mut written = 0u64;
        while written < total {
            let chunk: Vec<u8> = (0..64)
                .map(|_| {
                    let v = value;
                    value = value.wrapping_add(1);
                    v
                })
                .collect();
            p.write(&chunk);
            written += 64;
            if written % 2048 == 0 {
                std::thread::sleep(Duration::from_micros(500));
            }
        }
        p.close();
        assert_eq!(handle.join().unwrap(), total);
    }
}
