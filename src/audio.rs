//! The audio event ring: the one piece of emulator state touched from
//! outside the emulator thread. Grounded on
//! `examples/original_source/src/fake86/audio.c`'s `audio_event_t` union —
//! a speaker gate/frequency event or an Adlib register write, each tagged
//! with the cycle delta since the previous event.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioEvent {
    /// PC speaker gate/frequency changed. `freq` is the channel-2 tone
    /// frequency in Hz, valid only while `enable` is true.
    Speaker { enable: bool, freq: u16 },
    /// Adlib/OPL2 register write (address/data pair already resolved).
    Adlib { reg: u8, data: u8 },
}

const DEFAULT_CAPACITY: usize = 4096;

/// Bounded single-producer/single-consumer queue: the emulator thread
/// pushes, a host audio callback pops. Overflow drops the event and logs
/// rather than blocking the emulator thread.
pub struct AudioRing {
    queue: Mutex<VecDeque<(u64, AudioEvent)>>,
    capacity: usize,
}

impl Default for AudioRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl AudioRing {
    pub fn new(capacity: usize) -> Self {
        Self { queue: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn push(&self, cycle_delta: u64, event: AudioEvent) {
        let mut queue = self.queue.lock().expect("audio ring mutex poisoned");
        if queue.len() >= self.capacity {
            warn!(target: "pcxt86::audio", "audio event ring full, dropping event");
            return;
        }
        queue.push_back((cycle_delta, event));
    }

    pub fn pop(&self) -> Option<(u64, AudioEvent)> {
        self.queue.lock().expect("audio ring mutex poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("audio ring mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_order() {
        let ring = AudioRing::new(4);
        ring.push(10, AudioEvent::Speaker { enable: true, freq: 440 });
        ring.push(5, AudioEvent::Speaker { enable: false, freq: 440 });
        assert_eq!(ring.pop(), Some((10, AudioEvent::Speaker { enable: true, freq: 440 })));
        assert_eq!(ring.pop(), Some((5, AudioEvent::Speaker { enable: false, freq: 440 })));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn overflow_drops_event() {
        let ring = AudioRing::new(1);
        ring.push(1, AudioEvent::Adlib { reg: 0, data: 0 });
        ring.push(2, AudioEvent::Adlib { reg: 1, data: 1 });
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pop(), Some((1, AudioEvent::Adlib { reg: 0, data: 0 })));
    }
}
