use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide cancellation context, tripped once on SIGINT.
#[derive(Clone, Debug)]
pub(crate) struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = watch::channel(false);

        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub(crate) fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled; never resolves otherwise.
    pub(crate) async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Trips the token on the first Ctrl-C delivered to the process.
    pub(crate) fn cancel_on_interrupt(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received, cancelling in-flight work");
                token.cancel();
            }
        });
    }
}
