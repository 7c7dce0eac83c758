use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::error::PipelineError;

/// Requests a stop of the watch loop; cloneable across threads.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Sender<()>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.0.send(());
    }
}

#[derive(Debug)]
pub struct ShutdownSignal(Receiver<()>);

impl ShutdownSignal {
    /// Waits up to `timeout`; true when shutdown was requested meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.0.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    pub fn requested(&self) -> bool {
        match self.0.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = mpsc::channel();
    (ShutdownHandle(tx), ShutdownSignal(rx))
}

/// Routes Ctrl-C into a shutdown request. The running cycle finishes first.
pub fn interrupt_signal() -> Result<ShutdownSignal, PipelineError> {
    let (handle, signal) = shutdown_channel();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping after the current cycle");
        handle.shutdown();
    })
    .map_err(|err| PipelineError::Interrupt(err.to_string()))?;
    Ok(signal)
}

/// Runs `cycle` immediately and then every `interval` until shutdown.
///
/// A failing cycle is logged and the loop keeps going. Returns the number of
/// cycles started.
pub fn run_watch<F>(interval: Duration, signal: &ShutdownSignal, mut cycle: F) -> usize
where
    F: FnMut(usize) -> Result<(), PipelineError>,
{
    let mut count = 0;
    loop {
        if signal.requested() {
            break;
        }
        count += 1;
        let started = Instant::now();
        if let Err(err) = cycle(count) {
            error!(cycle = count, "cycle failed: {err}");
        }
        info!(
            cycle = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            next_in_secs = interval.as_secs(),
            "cycle finished"
        );
        if signal.wait(interval) {
            break;
        }
    }
    info!(cycles = count, "watch stopped");
    count
}
