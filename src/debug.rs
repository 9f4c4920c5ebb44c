//! Real-time safe logging for the audio thread.
//!
//! Messages are formatted into fixed-size slots of a lock-free SPSC ring on
//! the audio thread and written to `/tmp/disperser.log` from non-real-time
//! callbacks. Compiled in only with the `debug` feature; otherwise `dz_log!`
//! expands to nothing observable.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const RING_SLOTS: usize = 128;
    const MSG_BYTES: usize = 256;
    const LOG_PATH: &str = "/tmp/disperser.log";

    #[derive(Copy, Clone)]
    struct Slot {
        len: u16,
        bytes: [u8; MSG_BYTES],
    }

    impl Slot {
        const EMPTY: Slot = Slot {
            len: 0,
            bytes: [0; MSG_BYTES],
        };

        fn text(&self) -> &str {
            std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("<invalid>")
        }
    }

    /// Formats straight into a slot, truncating on a char boundary.
    struct SlotWriter {
        slot: Slot,
    }

    impl fmt::Write for SlotWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let used = self.slot.len as usize;
            let avail = MSG_BYTES - used;
            if avail == 0 {
                return Ok(());
            }
            let mut n = s.len().min(avail);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.slot.bytes[used..used + n].copy_from_slice(&s.as_bytes()[..n]);
            self.slot.len = (used + n) as u16;
            Ok(())
        }
    }

    struct MessageRing {
        head: AtomicUsize,
        tail: AtomicUsize,
        dropped: AtomicUsize,
        slots: Box<[UnsafeCell<Slot>]>,
    }

    // Single producer (audio thread), single consumer (drain).
    unsafe impl Sync for MessageRing {}

    impl MessageRing {
        fn new() -> Self {
            let slots: Vec<UnsafeCell<Slot>> =
                (0..RING_SLOTS).map(|_| UnsafeCell::new(Slot::EMPTY)).collect();
            Self {
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
                slots: slots.into_boxed_slice(),
            }
        }

        fn push(&self, slot: Slot) {
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) % self.slots.len();
            if next == self.tail.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            unsafe {
                *self.slots[head].get() = slot;
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<Slot> {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            let slot = unsafe { *self.slots[tail].get() };
            self.tail.store((tail + 1) % self.slots.len(), Ordering::Release);
            Some(slot)
        }
    }

    static RING: OnceLock<MessageRing> = OnceLock::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    /// Allocates the ring. Call from a non-real-time context.
    pub fn init_logger() {
        let _ = RING.get_or_init(MessageRing::new);
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn log_args(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(ring) = RING.get() else {
            return;
        };
        let mut w = SlotWriter { slot: Slot::EMPTY };
        let _ = fmt::write(&mut w, args);
        ring.push(w.slot);
    }

    /// Hand every queued message to `sink`, oldest first. Returns how many
    /// messages were lost to a full ring since the last drain.
    pub fn drain_with(mut sink: impl FnMut(&str)) -> usize {
        let Some(ring) = RING.get() else {
            return 0;
        };
        while let Some(slot) = ring.pop() {
            if slot.len > 0 {
                sink(slot.text());
            }
        }
        ring.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn drain_to_file() {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(LOG_PATH) else {
            return;
        };
        let dropped = drain_with(|msg| {
            let _ = writeln!(file, "{msg}");
        });
        if dropped > 0 {
            let _ = writeln!(file, "[LOG] {dropped} messages dropped");
        }
    }

}

#[cfg(feature = "debug")]
pub(crate) fn dz_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn dz_log_inner(_args: fmt::Arguments) {}

#[macro_export]
macro_rules! dz_log {
    ($($arg:tt)*) => {
        $crate::debug::dz_log_inner(format_args!($($arg)*))
    };
}
