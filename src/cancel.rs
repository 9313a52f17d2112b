/*!
 * Run-level cancellation.
 *
 * A `CancellationToken` is cloned into every worker. Workers check it before
 * each suspension point and race long external calls against `cancelled()`.
 */

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation flag shared by every worker of a run
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Trigger cancellation for every clone of this token
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any token clone, so this only ends on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
