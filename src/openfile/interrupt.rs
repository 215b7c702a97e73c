//! Lock-interruption refcounting (ยง4.6.8, ยง9 "Lock interrupt refcounting").
//!
//! A blocking `setlk`/`flock` call may sit on the master indefinitely. When
//! the driver cancels the waiting call (process signalled), a spawned thread
//! sends periodic interrupt frames until the original call returns. Both the
//! spawner and the waiting call hold a reference to the same shared
//! descriptor; the side that drops the refcount to zero is the one that
//! tears it down — the classic last-one-out-frees idiom, which maps
//! directly onto `Arc`'s own strong count here instead of a hand-rolled one.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const INTERRUPT_PERIOD: Duration = Duration::from_millis(100);

/// Sends one interrupt frame to the master for a pending lock call. Callers
/// supply this as a closure wired to the real `MasterClient` so this module
/// stays independent of the wire protocol (ยง1 Non-goals).
pub trait InterruptSink: Send + Sync + 'static {
    fn send_interrupt(&self);
}

impl<F: Fn() + Send + Sync + 'static> InterruptSink for F {
    fn send_interrupt(&self) {
        self()
    }
}

/// Spawns the interrupt thread for one pending blocking lock call.
///
/// The thread sends an interrupt every 100ms for as long as `Arc::strong_count`
/// on `shared` is greater than one, i.e. for as long as the original waiting
/// call still holds its half of the reference. The caller is expected to
/// hold its own clone of `shared` for the lifetime of the blocking RPC and
/// drop it when that RPC returns, which is what causes this thread to exit.
pub fn spawn_interrupt_thread<S: InterruptSink>(shared: Arc<S>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while Arc::strong_count(&shared) > 1 {
            shared.send_interrupt();
            std::thread::sleep(INTERRUPT_PERIOD);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);
    impl InterruptSink for CountingSink {
        fn send_interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sends_interrupts_until_waiting_side_drops_its_ref() {
        let shared = Arc::new(CountingSink(AtomicUsize::new(0)));
        let waiting_ref = shared.clone();
        let handle = spawn_interrupt_thread(shared.clone());

        std::thread::sleep(Duration::from_millis(250));
        assert!(waiting_ref.0.load(Ordering::SeqCst) >= 2);

        drop(waiting_ref);
        handle.join().unwrap();
    }

    #[test]
    fn never_sends_if_waiting_side_already_gone() {
        let shared = Arc::new(CountingSink(AtomicUsize::new(0)));
        let handle = spawn_interrupt_thread(shared.clone());
        handle.join().unwrap();
        assert_eq!(shared.0.load(Ordering::SeqCst), 0);
    }
}
