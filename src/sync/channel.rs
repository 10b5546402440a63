use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::sync::spinlock::SpinLock;

/// Unbuffered rendezvous channel carrying one `i32` per exchange.
///
/// A `send` pairs up with exactly one `receive`; both return only after
/// the value changed hands. Any number of senders and receivers may use
/// the channel, but a lock on each side keeps at most one pairing in
/// flight at a time.
pub struct Channel {
    name: &'static str,
    send_lock: Lock,
    recv_lock: Lock,
    receiver_ready: Semaphore,
    value_delivered: Semaphore,
    slot: SpinLock<Option<i32>>,
}

impl Channel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            send_lock: Lock::new("channel send"),
            recv_lock: Lock::new("channel receive"),
            receiver_ready: Semaphore::new("channel receiver ready", 0),
            value_delivered: Semaphore::new("channel value delivered", 0),
            slot: SpinLock::new(None, "channel slot"),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until a receiver is waiting, then hand `message` over.
    pub fn send(&self, message: i32) {
        self.send_lock.acquire();
        self.receiver_ready.p();
        {
            let mut slot = self.slot.acquire();
            assert!(slot.is_none(), "channel {:?}: slot already full", self.name);
            *slot = Some(message);
        }
        self.value_delivered.v();
        self.send_lock.release();
    }

    /// Block until a sender delivers, then return the value.
    pub fn receive(&self) -> i32 {
        self.recv_lock.acquire();
        self.receiver_ready.v();
        self.value_delivered.p();
        let message = self
            .slot
            .acquire()
            .take()
            .expect("channel rendezvous completed without a value");
        self.recv_lock.release();
        message
    }
}
