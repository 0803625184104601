//! Runtime seam for background work
//!
//! The registrar never names an executor. It hands its liveness tasks to a
//! [`Spawner`] and waits between heartbeats with [`sleep`], which picks the
//! timer of the enabled runtime feature (`smol` wins when both are enabled).

use futures::future::BoxFuture;
use std::time::Duration;

/// Something that can run a future in the background
pub trait Spawner: Send + Sync {
    /// Spawn a detached future; it runs to completion on its own
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Spawner for the Smol runtime
#[cfg(feature = "smol")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

#[cfg(feature = "smol")]
impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        smol::spawn(future).detach();
    }
}

/// Spawner for the Tokio runtime; must be used inside a Tokio context
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(feature = "tokio")]
impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        // JoinHandle detaches when dropped
        tokio::spawn(future);
    }
}

/// Sleep for the specified duration using the enabled runtime
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        tokio::time::sleep(duration).await;
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        compile_error!("One of the runtime features must be enabled: smol or tokio");
    }
}
