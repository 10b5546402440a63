use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use rand::Rng;

use crate::fs::bitmap::Bitmap;
use crate::sync::spinlock::SpinLock;
use crate::vm::addr_space::AddressSpace;

/// How a victim frame is chosen when physical memory is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Evict the frame allocated longest ago.
    Fifo,
    /// Evict the frame referenced longest ago.
    Lru,
    /// Evict a uniformly random occupied frame.
    Random,
}

struct FrameRef {
    vpn: usize,
    space: Weak<AddressSpace>,
}

struct Inner {
    frames: Bitmap,
    entries: Vec<Option<FrameRef>>,
    // FIFO/LRU order; for Random it just tracks the occupied frames.
    queue: VecDeque<usize>,
}

/// The physical-frame manager: which frame holds which (space, vpn), and
/// the replacement policy applied under memory pressure.
///
/// Invariants: a frame is occupied exactly when its bitmap bit is set;
/// every occupied frame records a live owner; the queue holds exactly the
/// occupied frames.
pub struct CoreMap {
    policy: ReplacementPolicy,
    inner: SpinLock<Inner>,
}

impl CoreMap {
    pub fn new(num_frames: usize, policy: ReplacementPolicy) -> Self {
        Self {
            policy,
            inner: SpinLock::new(
                Inner {
                    frames: Bitmap::new(num_frames),
                    entries: (0..num_frames).map(|_| None).collect(),
                    queue: VecDeque::new(),
                },
                "core map",
            ),
        }
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    /// Claim a frame for `(space, vpn)`. When none is free, a victim is
    /// chosen, its owner writes the page to swap, and the frame is
    /// reused.
    ///
    /// The victim's slot is reassigned before its swap write runs, so a
    /// concurrent fault cannot pick the same frame twice; the write
    /// itself happens outside the map's critical section because it
    /// blocks on disk I/O.
    pub fn find(&self, vpn: usize, space: &Arc<AddressSpace>) -> usize {
        let (frame, victim) = {
            let mut inner = self.inner.acquire();
            let frame = match inner.frames.find() {
                Some(f) => f,
                None => self.pick_victim(&mut inner),
            };
            let victim = inner.entries[frame].take();
            inner.entries[frame] = Some(FrameRef {
                vpn,
                space: Arc::downgrade(space),
            });
            inner.queue.push_back(frame);
            (frame, victim)
        };
        if let Some(victim) = victim {
            log::debug!(
                target: "vm",
                "evicting vpn {} from frame {} for vpn {}",
                victim.vpn,
                frame,
                vpn
            );
            if let Some(owner) = victim.space.upgrade() {
                owner.write_to_swap(victim.vpn);
            }
        }
        frame
    }

    fn pick_victim(&self, inner: &mut Inner) -> usize {
        match self.policy {
            ReplacementPolicy::Fifo | ReplacementPolicy::Lru => inner
                .queue
                .pop_front()
                .expect("core map full but no occupied frame"),
            ReplacementPolicy::Random => {
                let i = rand::thread_rng().gen_range(0..inner.queue.len());
                inner
                    .queue
                    .remove(i)
                    .expect("core map full but no occupied frame")
            }
        }
    }

    /// Note a reference to `frame`; under LRU this makes it the youngest.
    pub fn page_used(&self, frame: usize) {
        if self.policy != ReplacementPolicy::Lru {
            return;
        }
        let mut inner = self.inner.acquire();
        if let Some(i) = inner.queue.iter().position(|&f| f == frame) {
            inner.queue.remove(i);
            inner.queue.push_back(frame);
        }
    }

    /// Release `frame`; it must be occupied.
    pub fn clear(&self, frame: usize) {
        let mut inner = self.inner.acquire();
        inner.frames.clear(frame);
        inner.entries[frame] = None;
        inner.queue.retain(|&f| f != frame);
    }

    pub fn count_clear(&self) -> usize {
        self.inner.acquire().frames.count_clear()
    }

    /// The (frame, vpn) pairs currently resident, in queue order.
    pub fn resident_pages(&self) -> Vec<(usize, usize)> {
        let inner = self.inner.acquire();
        inner
            .queue
            .iter()
            .map(|&f| {
                let r = inner.entries[f].as_ref().expect("queued frame unoccupied");
                (f, r.vpn)
            })
            .collect()
    }

    /// Diagnostic: occupied-iff-marked, and the queue mirrors occupancy.
    pub fn invariants_hold(&self) -> bool {
        let inner = self.inner.acquire();
        for f in 0..inner.entries.len() {
            let occupied = inner.frames.test(f);
            if occupied != inner.entries[f].is_some() {
                return false;
            }
            if occupied != inner.queue.contains(&f) {
                return false;
            }
        }
        inner.queue.len() == inner.entries.iter().filter(|e| e.is_some()).count()
    }
}
