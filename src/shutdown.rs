//! One-shot shutdown signalling.
//!
//! Every party that may end the process (the STOP handler, the self-destruct timer)
//! holds a cloned [`Trigger`]. The main thread owns the single [`Listener`] and parks on
//! it until the first signal arrives.

use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// A client posted the sentinel payload.
    StopRequested,
    /// The scheduled delay ran out.
    Timer,
    /// Every trigger was dropped without firing.
    Abandoned,
}

pub fn channel() -> (Trigger, Listener) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Trigger { tx }, Listener { rx })
}

#[derive(Clone)]
pub struct Trigger {
    tx: mpsc::SyncSender<Reason>,
}

impl Trigger {
    /// Raises the signal. Never blocks; a raise after the first is dropped.
    pub fn signal(&self, reason: Reason) {
        match self.tx.try_send(reason) {
            Ok(()) => debug!("shutdown signalled; reason={:?}", reason),
            Err(mpsc::TrySendError::Full(_)) => debug!("shutdown already pending; reason={:?}", reason),
            Err(mpsc::TrySendError::Disconnected(_)) => debug!("nobody waits for shutdown anymore; reason={:?}", reason),
        }
    }

    /// Raises the signal from a watcher thread once `delay` has passed.
    pub fn schedule(&self, delay: Duration) -> io::Result<thread::JoinHandle<()>> {
        let trigger = self.clone();
        thread::Builder::new()
            .name("shutdown-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                info!("{:?} elapsed, shutting down", delay);
                trigger.signal(Reason::Timer);
            })
    }
}

pub struct Listener {
    rx: mpsc::Receiver<Reason>,
}

impl Listener {
    /// Blocks until the first signal arrives.
    pub fn wait(self) -> Reason {
        self.rx.recv().unwrap_or(Reason::Abandoned)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Reason> {
        match self.rx.recv_timeout(timeout) {
            Ok(reason) => Some(reason),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Reason::Abandoned),
        }
    }
}
