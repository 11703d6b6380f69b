use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::watch::{self, Receiver, Sender};

/// Signals shutdown to every listener created from this handle and from any handle derived from
/// it with [ShutdownHandle::child].
///
/// Handles form a tree. The executor owns the root, each scenario scheduler owns a child and each
/// virtual user owns a grandchild. Shutting down a node is seen by all of its descendants but
/// never by its parent or siblings, which is how a scheduler can stop a single virtual user
/// without touching the others.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<Sender<bool>>,
    parents: Vec<Receiver<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(watch::channel(false).0),
            parents: Vec::new(),
        }
    }

    /// Signal shutdown. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if !self.sender.send_replace(true) {
            log::trace!("Shutdown signalled");
        }
    }

    /// Whether this handle, or any of its ancestors, has been shut down.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow() || self.parents.iter().any(|parent| *parent.borrow())
    }

    /// Derive a handle that shuts down with this one but can also be shut down on its own.
    pub fn child(&self) -> ShutdownHandle {
        let mut parents = self.parents.clone();
        parents.push(self.sender.subscribe());

        Self {
            sender: Arc::new(watch::channel(false).0),
            parents,
        }
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        let mut receivers = self.parents.clone();
        receivers.push(self.sender.subscribe());

        DelegatedShutdownListener { receivers }
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receivers: Vec<Receiver<bool>>,
}

impl DelegatedShutdownListener {
    /// Point in time check if the shutdown signal has been received. If this returns true then work
    /// should be stopped so that the scenario can shut down.
    ///
    /// A handle that has been dropped can never signal again, so it counts as shut down.
    pub fn should_shutdown(&self) -> bool {
        self.receivers
            .iter()
            .any(|receiver| *receiver.borrow() || receiver.has_changed().is_err())
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future
    /// so that the shutdown signal can be used to cancel other work in progress.
    pub async fn wait_for_shutdown(&mut self) {
        if self.should_shutdown() {
            return;
        }

        let waits = self.receivers.iter_mut().map(|receiver| {
            Box::pin(async move {
                // An error means the sender is gone, treated the same as a shutdown.
                let _ = receiver.wait_for(|shutdown| *shutdown).await;
            })
        });

        select_all(waits).await;
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Execution cancelled by shutdown signal".to_string(),
        }
    }
}
