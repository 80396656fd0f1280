//! Prophecy queue - ordered, command-id indexed
//!
//! An arena-backed intrusive doubly linked list plus a command-id hash
//! index. The list keeps application order; the arena gives O(1) lookup,
//! head pop and suffix detachment, which is what reformation needs.

use std::collections::HashMap;

use sibyl_core::CommandId;

use crate::Prophecy;

struct Slot<S> {
    prophecy: Option<Prophecy<S>>,
    next: Option<usize>,
    prev: Option<usize>,
}

/// Ordered queue of all not-yet-finalized prophecies
pub struct ProphecyQueue<S> {
    arena: Vec<Slot<S>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<CommandId, usize>,
}

impl<S> Default for ProphecyQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProphecyQueue<S> {
    pub fn new() -> Self {
        ProphecyQueue {
            arena: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, command_id: CommandId) -> bool {
        self.index.contains_key(&command_id)
    }

    pub fn get(&self, command_id: CommandId) -> Option<&Prophecy<S>> {
        let slot = *self.index.get(&command_id)?;
        self.arena[slot].prophecy.as_ref()
    }

    pub fn get_mut(&mut self, command_id: CommandId) -> Option<&mut Prophecy<S>> {
        let slot = *self.index.get(&command_id)?;
        self.arena[slot].prophecy.as_mut()
    }

    pub fn front(&self) -> Option<&Prophecy<S>> {
        self.arena[self.head?].prophecy.as_ref()
    }

    pub fn back(&self) -> Option<&Prophecy<S>> {
        self.arena[self.tail?].prophecy.as_ref()
    }

    /// Append at the tail. Panics on duplicate command id; callers dedup
    /// through `contains` first.
    pub fn push_back(&mut self, prophecy: Prophecy<S>) {
        let command_id = prophecy.command_id();
        assert!(
            !self.index.contains_key(&command_id),
            "duplicate prophecy {command_id:?}"
        );

        let slot = self.alloc(prophecy);
        self.arena[slot].prev = self.tail;
        self.arena[slot].next = None;
        match self.tail {
            Some(tail) => self.arena[tail].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(command_id, slot);
    }

    /// Remove and return the head.
    pub fn pop_front(&mut self) -> Option<Prophecy<S>> {
        let slot = self.head?;
        Some(self.unlink(slot))
    }

    /// Remove and return the tail.
    pub fn pop_back(&mut self) -> Option<Prophecy<S>> {
        let slot = self.tail?;
        Some(self.unlink(slot))
    }

    /// Remove one prophecy anywhere in the queue.
    pub fn remove(&mut self, command_id: CommandId) -> Option<Prophecy<S>> {
        let slot = *self.index.get(&command_id)?;
        Some(self.unlink(slot))
    }

    /// The first command in queue order among `candidates`, if any.
    pub fn earliest_of(&self, candidates: &[CommandId]) -> Option<CommandId> {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let prophecy = self.arena[slot]
                .prophecy
                .as_ref()
                .expect("linked slot must be occupied");
            if candidates.contains(&prophecy.command_id()) {
                return Some(prophecy.command_id());
            }
            cursor = self.arena[slot].next;
        }
        None
    }

    /// Detach the contiguous suffix starting at `command_id` through the
    /// tail, in queue order. All detached entries leave the index.
    pub fn detach_suffix(&mut self, command_id: CommandId) -> Vec<Prophecy<S>> {
        let Some(&start) = self.index.get(&command_id) else {
            return Vec::new();
        };

        let mut detached = Vec::new();
        let mut cursor = Some(start);
        while let Some(slot) = cursor {
            cursor = self.arena[slot].next;
            detached.push(self.unlink(slot));
        }
        detached
    }

    pub fn iter(&self) -> Iter<'_, S> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    fn alloc(&mut self, prophecy: Prophecy<S>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.arena[slot].prophecy = Some(prophecy);
                slot
            }
            None => {
                self.arena.push(Slot {
                    prophecy: Some(prophecy),
                    next: None,
                    prev: None,
                });
                self.arena.len() - 1
            }
        }
    }

    fn unlink(&mut self, slot: usize) -> Prophecy<S> {
        let prev = self.arena[slot].prev;
        let next = self.arena[slot].next;
        match prev {
            Some(prev) => self.arena[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.arena[next].prev = prev,
            None => self.tail = prev,
        }
        self.arena[slot].prev = None;
        self.arena[slot].next = None;

        let prophecy = self.arena[slot]
            .prophecy
            .take()
            .expect("unlinked slot must be occupied");
        self.index.remove(&prophecy.command_id());
        self.free.push(slot);
        prophecy
    }
}

pub struct Iter<'a, S> {
    queue: &'a ProphecyQueue<S>,
    cursor: Option<usize>,
}

impl<'a, S> Iterator for Iter<'a, S> {
    type Item = &'a Prophecy<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        self.cursor = self.queue.arena[slot].next;
        self.queue.arena[slot].prophecy.as_ref()
    }
}
