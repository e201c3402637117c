use std::{
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use luanti_core::MapBlockPos;
use parking_lot::{Condvar, Mutex};

use crate::{block_store::BlockHandle, error::EmergeFailure};

/// Outcome of an emerge request
pub type EmergeResult = Result<BlockHandle, EmergeFailure>;

/// Snapshot of an emerge request.
#[derive(Clone, Debug)]
pub enum EmergeStatus {
    /// Still queued or being worked on
    Pending,
    /// The block is resident
    Ready(BlockHandle),
    /// The block will never become available
    Failed(EmergeFailure),
}

#[derive(Default)]
struct TicketState {
    result: Option<EmergeResult>,
    wakers: Vec<Waker>,
}

/// Handle to a requested block.
///
/// All requests for the same block share one ticket. It can be polled, waited for or awaited.
#[derive(Clone)]
pub struct EmergeTicket {
    pos: MapBlockPos,
    state: Arc<(Mutex<TicketState>, Condvar)>,
}

impl EmergeTicket {
    pub(crate) fn new(pos: MapBlockPos) -> Self {
        Self {
            pos,
            state: Arc::default(),
        }
    }

    /// A ticket which is already done.
    pub(crate) fn completed(pos: MapBlockPos, result: EmergeResult) -> Self {
        let ticket = Self::new(pos);
        ticket.complete(result);
        ticket
    }

    /// The requested block
    #[must_use]
    pub fn pos(&self) -> MapBlockPos {
        self.pos
    }

    /// Current state of the request.
    #[must_use]
    pub fn status(&self) -> EmergeStatus {
        match &self.state.0.lock().result {
            None => EmergeStatus::Pending,
            Some(Ok(handle)) => EmergeStatus::Ready(handle.clone()),
            Some(Err(failure)) => EmergeStatus::Failed(failure.clone()),
        }
    }

    /// Blocks the calling thread until the request is done.
    pub fn wait(&self) -> EmergeResult {
        let (lock, done) = &*self.state;
        let mut state = lock.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            done.wait(&mut state);
        }
    }

    /// Like [`Self::wait`] but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<EmergeResult> {
        let (lock, done) = &*self.state;
        let mut state = lock.lock();
        if state.result.is_none() {
            done.wait_for(&mut state, timeout);
        }
        state.result.clone()
    }

    /// Stores the outcome and wakes everybody waiting. Only the first outcome counts.
    pub(crate) fn complete(&self, result: EmergeResult) {
        let (lock, done) = &*self.state;
        let wakers = {
            let mut state = lock.lock();
            if state.result.is_some() {
                return;
            }
            state.result = Some(result);
            mem::take(&mut state.wakers)
        };
        done.notify_all();
        wakers.into_iter().for_each(Waker::wake);
    }
}

impl Future for EmergeTicket {
    type Output = EmergeResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.0.lock();
        if let Some(result) = &state.result {
            return Poll::Ready(result.clone());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_block::MapBlock;
    use std::thread;

    #[test]
    fn waiting_threads_see_the_outcome() {
        let pos = MapBlockPos::ZERO;
        let ticket = EmergeTicket::new(pos);
        assert!(matches!(ticket.status(), EmergeStatus::Pending));
        assert!(ticket.wait_timeout(Duration::from_millis(1)).is_none());

        let waiter = {
            let ticket = ticket.clone();
            thread::spawn(move || ticket.wait())
        };
        let handle = BlockHandle::new(MapBlock::new(pos));
        ticket.complete(Ok(handle.clone()));
        ticket.complete(Err(EmergeFailure::Corrupt));

        assert!(waiter.join().unwrap().unwrap().same_block(&handle));
        assert!(matches!(ticket.status(), EmergeStatus::Ready(_)));
    }

    #[test]
    fn tickets_can_be_awaited() {
        let ticket = EmergeTicket::new(MapBlockPos::ZERO);
        let completer = {
            let ticket = ticket.clone();
            thread::spawn(move || ticket.complete(Err(EmergeFailure::OutsideLimits)))
        };
        assert_eq!(
            pollster::block_on(ticket).unwrap_err(),
            EmergeFailure::OutsideLimits
        );
        completer.join().unwrap();
    }
}
