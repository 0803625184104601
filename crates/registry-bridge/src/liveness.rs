//! Push-mode liveness task
//!
//! One task per advertised instance. Every interval it sends a heartbeat;
//! the first refused or failed heartbeat ends the task, which then removes
//! its own instance from the registry. A heartbeat that has not answered
//! within one interval counts as failed. Cancellation ends the task quietly,
//! including while a heartbeat is in flight.

use crate::client::{ClientError, RegistryClient};
use crate::runtime::sleep;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Why a liveness task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessExit {
    /// The owner cancelled the task
    Cancelled,
    /// A heartbeat failed and the instance was deregistered
    HeartbeatFailed,
}

/// Outcome of a single heartbeat
enum Beat {
    Accepted,
    Refused,
    Failed(ClientError),
    TimedOut,
    Panicked(String),
    Cancelled,
}

/// Owner's side of a liveness task
///
/// Dropping the handle cancels the task as well.
#[derive(Debug)]
pub struct LivenessHandle {
    cancel: async_channel::Sender<()>,
}

impl LivenessHandle {
    /// Stop the task; it exits within one interval without deregistering
    pub fn cancel(&self) {
        self.cancel.close();
    }

    /// Whether the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_closed()
    }
}

/// Periodic heartbeat for one registered instance
pub struct LivenessTask {
    client: Arc<dyn RegistryClient>,
    service_name: String,
    service_id: String,
    instance_id: String,
    interval: Duration,
    cancel: async_channel::Receiver<()>,
    on_failure: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LivenessTask {
    /// Create a task and the handle that cancels it
    pub fn new(
        client: Arc<dyn RegistryClient>,
        service_name: impl Into<String>,
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        interval: Duration,
    ) -> (Self, LivenessHandle) {
        let (tx, rx) = async_channel::bounded(1);
        let task = Self {
            client,
            service_name: service_name.into(),
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            interval,
            cancel: rx,
            on_failure: None,
        };
        (task, LivenessHandle { cancel: tx })
    }

    /// Run `hook` once heartbeats have failed, before deregistration starts
    pub fn on_failure(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Heartbeat until cancelled or until the first failure
    pub async fn run(mut self) -> LivenessExit {
        debug!(
            "Liveness task started for {} instance {} (every {:?})",
            self.service_name, self.instance_id, self.interval
        );

        loop {
            if self.wait_for_tick().await {
                debug!(
                    "Liveness task for {} instance {} cancelled",
                    self.service_name, self.instance_id
                );
                return LivenessExit::Cancelled;
            }

            match self.beat().await {
                Beat::Accepted => continue,
                Beat::Refused => warn!(
                    "Registry refused heartbeat for {} instance {}",
                    self.service_name, self.instance_id
                ),
                Beat::Failed(e) => warn!(
                    "Heartbeat for {} instance {} failed: {}",
                    self.service_name, self.instance_id, e
                ),
                Beat::TimedOut => warn!(
                    "Heartbeat for {} instance {} got no answer within {:?}",
                    self.service_name, self.instance_id, self.interval
                ),
                Beat::Panicked(message) => error!(
                    "Heartbeat for {} instance {} panicked: {}",
                    self.service_name, self.instance_id, message
                ),
                Beat::Cancelled => {
                    debug!(
                        "Liveness task for {} instance {} cancelled during heartbeat",
                        self.service_name, self.instance_id
                    );
                    return LivenessExit::Cancelled;
                }
            }

            // A cancel that raced the in-flight heartbeat wins
            if self.cancel.is_closed() {
                return LivenessExit::Cancelled;
            }

            if let Some(hook) = self.on_failure.take() {
                hook();
            }
            self.deregister().await;
            return LivenessExit::HeartbeatFailed;
        }
    }

    /// Wait one interval; true if cancelled meanwhile
    async fn wait_for_tick(&self) -> bool {
        if self.cancel.is_closed() {
            return true;
        }

        let tick = sleep(self.interval).fuse();
        let cancelled = self.cancel.recv().fuse();
        futures::pin_mut!(tick, cancelled);

        futures::select! {
            _ = cancelled => true,
            _ = tick => false,
        }
    }

    /// One heartbeat, bounded by the interval and interrupted by cancellation
    async fn beat(&self) -> Beat {
        let heartbeat = self.client.heartbeat(&self.service_id, &self.instance_id);
        let heartbeat = AssertUnwindSafe(heartbeat).catch_unwind().fuse();
        let deadline = sleep(self.interval).fuse();
        let cancelled = self.cancel.recv().fuse();
        futures::pin_mut!(heartbeat, deadline, cancelled);

        futures::select! {
            outcome = heartbeat => match outcome {
                Ok(Ok(true)) => Beat::Accepted,
                Ok(Ok(false)) => Beat::Refused,
                Ok(Err(e)) => Beat::Failed(e),
                Err(panic) => Beat::Panicked(panic_message(panic.as_ref())),
            },
            _ = cancelled => Beat::Cancelled,
            _ = deadline => Beat::TimedOut,
        }
    }

    /// Best effort within one interval; errors are logged and dropped
    async fn deregister(&self) {
        let unregister = self
            .client
            .unregister_instance(&self.service_id, &self.instance_id);
        let unregister = AssertUnwindSafe(unregister).catch_unwind().fuse();
        let deadline = sleep(self.interval).fuse();
        futures::pin_mut!(unregister, deadline);

        let outcome = futures::select! {
            outcome = unregister => outcome,
            _ = deadline => {
                warn!(
                    "Deregistering {} instance {} got no answer within {:?}",
                    self.service_name, self.instance_id, self.interval
                );
                return;
            }
        };

        match outcome {
            Ok(Ok(())) => debug!(
                "Deregistered {} instance {} after heartbeat failure",
                self.service_name, self.instance_id
            ),
            Ok(Err(e)) => warn!(
                "Failed to deregister {} instance {} after heartbeat failure: {}",
                self.service_name, self.instance_id, e
            ),
            Err(panic) => error!(
                "Deregistering {} instance {} panicked: {}",
                self.service_name,
                self.instance_id,
                panic_message(panic.as_ref())
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
