//! One-shot completion signal between a cache writer and its reader
//!
//! [`completion_channel`] returns a [`CompletionSignal`] owned by the writer task and
//! a [`CompletionWatcher`] owned by the reader. The signal closes exactly once: either
//! through [`CompletionSignal::close`], which consumes it, or when it is dropped
//! (including while a panicking writer unwinds).

use tokio_util::sync::CancellationToken;

/// Writer half: closes exactly once
#[derive(Debug)]
pub struct CompletionSignal {
    token: CancellationToken,
}

/// Reader half: observes the close without blocking
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    token: CancellationToken,
}

/// Create a connected signal/watcher pair in the open state
pub fn completion_channel() -> (CompletionSignal, CompletionWatcher) {
    let token = CancellationToken::new();
    (
        CompletionSignal {
            token: token.clone(),
        },
        CompletionWatcher { token },
    )
}

impl CompletionSignal {
    /// Close the signal, waking any watcher
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl CompletionWatcher {
    /// Non-blocking check used once per reader iteration
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal closes
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}
