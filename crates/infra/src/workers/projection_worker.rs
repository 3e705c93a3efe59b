use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use storefront_events::{EventBus, Subscription};

const TICK: Duration = Duration::from_millis(100);

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the worker to stop. Messages already
    /// queued on the subscription are handled first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Feeds bus messages to a handler on a dedicated thread.
///
/// Handlers must tolerate redelivery. A failing handler is logged and the
/// loop moves on.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribe to `bus` and spawn the worker thread. Messages rejected by
    /// `filter` are skipped.
    pub fn spawn<M, B, F, H, E>(name: &'static str, bus: &B, filter: F, mut handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M>,
        F: Fn(&M) -> bool + Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, filter, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, F, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    filter: F,
    handler: &mut H,
) where
    F: Fn(&M) -> bool,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let mut handle = |msg: M| {
        if !filter(&msg) {
            return;
        }
        if let Err(err) = handler(msg) {
            warn!(worker = name, error = ?err, "projection worker handler failed");
        }
    };

    loop {
        if shutdown_rx.try_recv().is_ok() {
            for msg in sub.drain() {
                handle(msg);
            }
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => handle(msg),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(worker = name, "projection worker stopped");
}
