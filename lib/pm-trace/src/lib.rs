// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Owned trace buffers for the power-management drivers
//!
//! Each driver object (a power domain, the idle state machine) keeps its own
//! record of what it did, rather than writing into a process-wide static. A
//! record is made of two parts:
//!
//! - a [`Ringbuf`] of the most recent events, where an event identical to the
//!   previous one (same source line, same payload) bumps a repeat count
//!   instead of consuming a new slot; and
//! - a set of [`EventCounts`], one counter per *kind* of event, which never
//!   wraps away and is what statistics are built from.
//!
//! [`CountedRingbuf`] bundles both. Events are recorded with the
//! [`count_entry!`] macro, which captures the line number of the call site:
//!
//! ```ignore
//! count_entry!(state.trace, Trace::PollDone { polls, status });
//! ```
//!
//! The kind of an event is a field-less enum implementing
//! [`enum_map::Enum`]. In practice it is generated from the event enum with
//! `enum_kinds::EnumKind`, which also provides the `From<&Event>`
//! conversion that [`CountedRingbuf::record`] needs.

use enum_map::{EnumArray, EnumMap};

///
/// A single [`Ringbuf`] slot. When an event is recorded with the same `line`
/// and `payload` as the most recent slot, `count` is incremented rather than
/// generating a new slot.
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring, with every slot holding `init`.
    pub fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if N == 0 {
            return;
        }
        if let Some(i) = self.last {
            let ent = &mut self.buffer[i];
            if ent.line == line && ent.payload == payload && ent.count < u32::MAX
            {
                ent.count += 1;
                return;
            }
        }

        let slot = self.last.map_or(0, |i| (i + 1) % N);
        let ent = &mut self.buffer[slot];
        ent.generation = ent.generation.wrapping_add(1);
        ent.line = line;
        ent.count = 1;
        ent.payload = payload;
        self.last = Some(slot);
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last_entry(&self) -> Option<&RingbufEntry<T>> {
        self.buffer.get(self.last?)
    }

    /// Iterates over recorded entries, oldest first. Slots that have never
    /// been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => self.buffer.len(),
        };
        self.buffer[start.min(self.buffer.len())..]
            .iter()
            .chain(self.buffer[..start.min(self.buffer.len())].iter())
            .filter(|ent| ent.count != 0)
    }

    /// Copies the recorded entries out, oldest first.
    pub fn snapshot(&self) -> Vec<RingbufEntry<T>> {
        self.iter().copied().collect()
    }
}

///
/// One counter per event kind `K`.
///
#[derive(Debug)]
pub struct EventCounts<K: EnumArray<u32>> {
    counts: EnumMap<K, u32>,
}

impl<K: EnumArray<u32>> Default for EventCounts<K> {
    fn default() -> Self {
        Self {
            counts: EnumMap::default(),
        }
    }
}

impl<K: EnumArray<u32> + Copy> EventCounts<K> {
    pub fn incr(&mut self, kind: K) {
        let c = &mut self.counts[kind];
        *c = c.saturating_add(1);
    }

    pub fn get(&self, kind: K) -> u32 {
        self.counts[kind]
    }

    /// Iterates over kinds that have been seen at least once.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (K, u32)> + '_ {
        self.counts
            .iter()
            .filter(|(_, n)| **n != 0)
            .map(|(k, n)| (k, *n))
    }
}

///
/// A [`Ringbuf`] of events `T` together with [`EventCounts`] keyed by the
/// event's kind `K`.
///
#[derive(Debug)]
pub struct CountedRingbuf<T: Copy + PartialEq, K: EnumArray<u32>, const N: usize>
{
    ring: Ringbuf<T, N>,
    counts: EventCounts<K>,
}

impl<T, K, const N: usize> CountedRingbuf<T, K, N>
where
    T: Copy + PartialEq,
    K: EnumArray<u32> + Copy + for<'a> From<&'a T>,
{
    pub fn new(init: T) -> Self {
        Self {
            ring: Ringbuf::new(init),
            counts: EventCounts::default(),
        }
    }

    pub fn record(&mut self, line: u16, event: T) {
        self.counts.incr(K::from(&event));
        self.ring.entry(line, event);
    }

    pub fn ring(&self) -> &Ringbuf<T, N> {
        &self.ring
    }

    pub fn counts(&self) -> &EventCounts<K> {
        &self.counts
    }

    pub fn count(&self, kind: K) -> u32 {
        self.counts.get(kind)
    }
}

/// Records `event` into the [`CountedRingbuf`] `buf`, tagged with the line
/// number of the call site.
#[macro_export]
macro_rules! count_entry {
    ($buf:expr, $event:expr) => {{
        // Evaluate the event before borrowing the buffer, so the event
        // expression may itself read from the same structure.
        let event = $event;
        $crate::CountedRingbuf::record(&mut $buf, line!() as u16, event);
    }};
}
