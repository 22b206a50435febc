//! Cooperative cancellation for a run.

use tokio::sync::watch;

/// Creates a linked pair: cancelling the handle fires every clone of the
/// [`Cancellation`].
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, Cancellation { receiver })
}

#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Cancels when the returned guard is dropped, e.g. when the request future
    /// owning it is abandoned.
    pub fn drop_guard(self) -> CancelOnDrop {
        CancelOnDrop { handle: self }
    }
}

#[derive(Debug)]
pub struct CancelOnDrop {
    handle: CancelHandle,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Receiving side of a cancellation signal.
///
/// A cancellation whose handle was dropped without cancelling never fires.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn never() -> Self {
        cancellation().1
    }

    #[cfg(test)]
    fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once cancelled, immediately if that already happened.
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.receiver.borrow_and_update();
            if cancelled {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
