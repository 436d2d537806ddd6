//! Bounded, cancelable polling for the external-form gate.
//!
//! The loop queries the provider on a fixed interval until both forms are
//! done or the ceiling elapses. Ceiling expiry is silent: the external
//! party may simply not have acted yet, so the UI stays "pending" and no
//! error is raised. The handle cancels the task at step teardown instead
//! of leaving a timer running against a stale record.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{FormCompletion, FormStatusProvider, GateConfig};
use crate::workflows::enrollment::domain::ApplicationId;

/// Spawns poll tasks for the contract gate.
pub struct GateWatcher<F> {
    provider: Arc<F>,
    config: GateConfig,
}

impl<F> GateWatcher<F>
where
    F: FormStatusProvider + 'static,
{
    pub fn new(provider: Arc<F>, config: GateConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Start polling for an application. Step teardown must call
    /// [`GateWatchHandle::cancel`]; dropping the handle also winds the
    /// task down, as a backstop against leaked handles.
    pub fn watch(&self, application: ApplicationId) -> GateWatchHandle {
        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (completion_tx, completion_rx) = watch::channel(None::<FormCompletion>);

        let task = tokio::spawn(async move {
            let ceiling = tokio::time::sleep(config.poll_ceiling);
            tokio::pin!(ceiling);
            let mut ticker = tokio::time::interval(config.poll_interval);

            loop {
                tokio::select! {
                    _ = &mut ceiling => {
                        // Silent expiry: stop polling, raise nothing.
                        debug!(application = %application.0, "form gate poll ceiling reached");
                        break;
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            debug!(application = %application.0, "form gate poll canceled");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match provider.completion_status(&application).await {
                            Ok(status) if status.complete() => {
                                let _ = completion_tx.send(Some(status));
                                break;
                            }
                            Ok(_) => {}
                            Err(error) => {
                                debug!(application = %application.0, %error, "form status poll failed, retrying");
                            }
                        }
                    }
                }
            }
        });

        GateWatchHandle {
            cancel: cancel_tx,
            completion: completion_rx,
            task,
        }
    }
}

/// Handle on a running poll task.
pub struct GateWatchHandle {
    cancel: watch::Sender<bool>,
    completion: watch::Receiver<Option<FormCompletion>>,
    task: JoinHandle<()>,
}

impl GateWatchHandle {
    /// Stop the poll loop. Safe to call more than once; a finished task
    /// ignores it.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Latest completion signal; stays `None` until both forms are done.
    pub fn completion(&self) -> Option<FormCompletion> {
        *self.completion.borrow()
    }

    /// Subscribe to the completion signal.
    pub fn subscribe(&self) -> watch::Receiver<Option<FormCompletion>> {
        self.completion.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to wind down after completion, cancellation, or
    /// ceiling expiry.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}
