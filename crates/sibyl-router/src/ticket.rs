//! Global FIFO ticket queue
//!
//! A claim may run its local persistence step only once every earlier
//! claim has finished its own. Turns are granted through a queue of
//! oneshot tokens rather than a bare mutex, so arbitrarily many claims
//! can have upstream I/O in flight while exactly one at a time occupies
//! the local-persistence critical section, in arrival order.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct TicketState {
    busy: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

#[derive(Default)]
pub struct TicketQueue {
    state: Mutex<TicketState>,
}

impl TicketQueue {
    pub fn new() -> Self {
        TicketQueue::default()
    }

    /// Wait for this caller's turn. The permit holds the turn until drop.
    pub async fn acquire(&self) -> TicketPermit<'_> {
        let waiter = {
            let mut state = self.state.lock();
            if !state.busy {
                state.busy = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            // The sender is only dropped if the queue itself is dropped,
            // which cannot happen while we borrow it.
            let _ = rx.await;
        }

        TicketPermit { queue: self }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        loop {
            match state.waiters.pop_front() {
                Some(next) => {
                    if next.send(()).is_ok() {
                        return;
                    }
                    // Waiter gave up; pass the turn along.
                }
                None => {
                    state.busy = false;
                    return;
                }
            }
        }
    }
}

pub struct TicketPermit<'a> {
    queue: &'a TicketQueue,
}

impl Drop for TicketPermit<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}
