// src/timer.rs
use std::os::fd::RawFd;
use std::time::Instant;

/// Handle to a live timer. Indices reference arena slots, not heap
/// positions, so a handle stays valid while its connection lives no matter
/// how the heap shuffles underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(usize);

enum Slot {
    Occupied {
        expire: Instant,
        token: RawFd,
        heap_pos: usize,
    },
    Free {
        next: Option<usize>,
    },
}

/// Indexed binary min-heap ordering connections by absolute expiry.
///
/// Each slot records its current heap position, making arbitrary deletion
/// and deadline adjustment O(log n) with no search. Equal expiries are
/// ordered by heap structure only. Only the dispatcher thread touches the
/// heap, so it carries no locking.
pub struct TimerHeap {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    heap: Vec<usize>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            heap: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Insert a timer expiring at `expire` that will evict `token` when it
    /// fires. Amortized O(log n); the backing storage doubles as needed.
    pub fn add_timer(&mut self, expire: Instant, token: RawFd) -> TimerId {
        let pos = self.heap.len();
        let slot = match self.free_head {
            Some(idx) => {
                self.free_head = match self.slots[idx] {
                    Slot::Free { next } => next,
                    Slot::Occupied { .. } => unreachable!("free list points at live slot"),
                };
                self.slots[idx] = Slot::Occupied {
                    expire,
                    token,
                    heap_pos: pos,
                };
                idx
            }
            None => {
                self.slots.push(Slot::Occupied {
                    expire,
                    token,
                    heap_pos: pos,
                });
                self.slots.len() - 1
            }
        };
        self.heap.push(slot);
        self.percolate_up(pos);
        TimerId(slot)
    }

    /// Remove an arbitrary timer: swap with the heap tail, then re-settle
    /// the swapped-in element in whichever direction it needs.
    pub fn del_timer(&mut self, id: TimerId) {
        let Some(pos) = self.heap_pos(id.0) else {
            return;
        };
        let last = self.heap.len() - 1;
        self.heap.swap(pos, last);
        self.set_heap_pos(self.heap[pos], pos);
        self.heap.pop();
        if pos < self.heap.len() {
            self.percolate_down(pos);
            self.percolate_up(pos);
        }
        self.release_slot(id.0);
    }

    /// Push a timer's deadline to a new expiry. Activity on a connection
    /// moves its deadline out, so the element re-settles downward; the
    /// upward pass covers the rare shrink.
    pub fn adjust_timer(&mut self, id: TimerId, new_expire: Instant) {
        let Some(pos) = self.heap_pos(id.0) else {
            return;
        };
        if let Slot::Occupied { expire, .. } = &mut self.slots[id.0] {
            *expire = new_expire;
        }
        self.percolate_down(pos);
        if let Some(pos) = self.heap_pos(id.0) {
            self.percolate_up(pos);
        }
    }

    /// The minimum-expiry timer, if any.
    pub fn top(&self) -> Option<(TimerId, Instant)> {
        let slot = *self.heap.first()?;
        match self.slots[slot] {
            Slot::Occupied { expire, .. } => Some((TimerId(slot), expire)),
            Slot::Free { .. } => None,
        }
    }

    /// Remove the minimum-expiry timer.
    pub fn pop_timer(&mut self) {
        if let Some((id, _)) = self.top() {
            self.del_timer(id);
        }
    }

    /// Fire every timer whose expiry is at or before `now`, stopping at the
    /// first unexpired root. The eviction callback receives the connection
    /// token and must close the socket and detach its resources; the timer
    /// node itself is popped here.
    pub fn tick(&mut self, now: Instant, mut evict: impl FnMut(RawFd)) {
        while let Some(&slot) = self.heap.first() {
            let (expire, token) = match self.slots[slot] {
                Slot::Occupied { expire, token, .. } => (expire, token),
                Slot::Free { .. } => break,
            };
            if expire > now {
                break;
            }
            evict(token);
            self.pop_timer();
        }
    }

    fn heap_pos(&self, slot: usize) -> Option<usize> {
        match self.slots.get(slot) {
            Some(Slot::Occupied { heap_pos, .. }) => Some(*heap_pos),
            _ => None,
        }
    }

    fn set_heap_pos(&mut self, slot: usize, pos: usize) {
        if let Slot::Occupied { heap_pos, .. } = &mut self.slots[slot] {
            *heap_pos = pos;
        }
    }

    fn expire_of(&self, slot: usize) -> Instant {
        match self.slots[slot] {
            Slot::Occupied { expire, .. } => expire,
            Slot::Free { .. } => unreachable!("heap references freed slot"),
        }
    }

    fn release_slot(&mut self, slot: usize) {
        self.slots[slot] = Slot::Free {
            next: self.free_head,
        };
        self.free_head = Some(slot);
    }

    fn percolate_up(&mut self, mut hole: usize) {
        while hole > 0 {
            let parent = (hole - 1) / 2;
            if self.expire_of(self.heap[parent]) <= self.expire_of(self.heap[hole]) {
                break;
            }
            self.heap.swap(parent, hole);
            self.set_heap_pos(self.heap[hole], hole);
            self.set_heap_pos(self.heap[parent], parent);
            hole = parent;
        }
    }

    fn percolate_down(&mut self, mut hole: usize) {
        loop {
            let left = 2 * hole + 1;
            let right = 2 * hole + 2;
            let mut smallest = hole;
            if left < self.heap.len()
                && self.expire_of(self.heap[left]) < self.expire_of(self.heap[smallest])
            {
                smallest = left;
            }
            if right < self.heap.len()
                && self.expire_of(self.heap[right]) < self.expire_of(self.heap[smallest])
            {
                smallest = right;
            }
            if smallest == hole {
                break;
            }
            self.heap.swap(smallest, hole);
            self.set_heap_pos(self.heap[hole], hole);
            self.set_heap_pos(self.heap[smallest], smallest);
            hole = smallest;
        }
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn assert_heap_property(heap: &TimerHeap) {
        for i in 1..heap.heap.len() {
            let parent = (i - 1) / 2;
            assert!(
                heap.expire_of(heap.heap[parent]) <= heap.expire_of(heap.heap[i]),
                "heap property violated at index {}",
                i
            );
            // Stored positions must match true positions.
            assert_eq!(heap.heap_pos(heap.heap[i]), Some(i));
        }
        if let Some(&root) = heap.heap.first() {
            assert_eq!(heap.heap_pos(root), Some(0));
        }
    }

    #[test]
    fn add_orders_by_expiry() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        for (i, secs) in [9u64, 3, 7, 1, 5, 8, 2].iter().enumerate() {
            heap.add_timer(base + Duration::from_secs(*secs), i as RawFd);
            assert_heap_property(&heap);
        }
        let (_, expire) = heap.top().unwrap();
        assert_eq!(expire, base + Duration::from_secs(1));
    }

    #[test]
    fn del_arbitrary_element_keeps_invariant() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        let ids: Vec<TimerId> = (0..16)
            .map(|i| heap.add_timer(base + Duration::from_secs((i * 13 % 17) as u64), i))
            .collect();
        heap.del_timer(ids[5]);
        assert_heap_property(&heap);
        heap.del_timer(ids[0]);
        assert_heap_property(&heap);
        heap.del_timer(ids[15]);
        assert_heap_property(&heap);
        assert_eq!(heap.len(), 13);
        // Deleting an already-removed id is a no-op.
        heap.del_timer(ids[5]);
        assert_eq!(heap.len(), 13);
    }

    #[test]
    fn adjust_pushes_deadline_out() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        let near = heap.add_timer(base + Duration::from_secs(1), 10);
        heap.add_timer(base + Duration::from_secs(2), 11);
        heap.add_timer(base + Duration::from_secs(3), 12);
        heap.adjust_timer(near, base + Duration::from_secs(30));
        assert_heap_property(&heap);
        let (_, expire) = heap.top().unwrap();
        assert_eq!(expire, base + Duration::from_secs(2));
    }

    #[test]
    fn pop_drains_in_expiry_order() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        for secs in [4u64, 1, 3, 2] {
            heap.add_timer(base + Duration::from_secs(secs), secs as RawFd);
        }
        let mut seen = Vec::new();
        while let Some((_, expire)) = heap.top() {
            seen.push(expire);
            heap.pop_timer();
            assert_heap_property(&heap);
        }
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(seen, sorted);
        assert!(heap.is_empty());
    }

    #[test]
    fn tick_fires_only_expired_timers() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        heap.add_timer(base + Duration::from_secs(5), 100);
        heap.add_timer(base + Duration::from_secs(10), 200);

        let mut evicted = Vec::new();
        heap.tick(base + Duration::from_secs(4), |fd| evicted.push(fd));
        assert!(evicted.is_empty());
        assert_eq!(heap.len(), 2);

        heap.tick(base + Duration::from_secs(5), |fd| evicted.push(fd));
        assert_eq!(evicted, vec![100]);
        assert_eq!(heap.len(), 1);

        heap.tick(base + Duration::from_secs(60), |fd| evicted.push(fd));
        assert_eq!(evicted, vec![100, 200]);
        assert!(heap.is_empty());
    }

    #[test]
    fn slot_reuse_after_eviction() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        let a = heap.add_timer(base + Duration::from_secs(1), 1);
        heap.del_timer(a);
        let b = heap.add_timer(base + Duration::from_secs(2), 2);
        // Freed arena slot gets reused.
        assert_eq!(a.0, b.0);
        assert_eq!(heap.len(), 1);
        assert_heap_property(&heap);
    }
}
