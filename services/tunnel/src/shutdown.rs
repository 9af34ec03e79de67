//! Cancellation signal shared by every supervised task.

use tokio::sync::watch;

/// Resolve once the signal is set to true, or once its sender is gone.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
