//! Process lifecycle: cooperative shutdown and signal handling
//!
//! Signals never terminate the process directly. SIGINT/SIGTERM only flip
//! the run flag and wake the multiplexer, which then returns so the caller
//! can close every bus socket and destroy the transport. SIGCHLD reaps
//! finished child processes and has no other effect.

use crate::types::Result;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;

/// Cloneable cancellation flag with a pollable wake descriptor
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    requested: AtomicBool,
    wake_tx: UnixStream,
    wake_rx: UnixStream,
}

impl ShutdownSignal {
    /// Create an untriggered signal
    pub fn new() -> io::Result<Self> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_tx.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;

        Ok(Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
        })
    }

    /// Request shutdown and wake any waiter
    pub fn trigger(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            // a full buffer already means "readable"
            let _ = (&self.inner.wake_tx).write(&[1]);
        }
    }

    /// True once shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Descriptor that becomes readable when shutdown is requested
    pub fn wake_fd(&self) -> RawFd {
        self.inner.wake_rx.as_raw_fd()
    }
}

/// Background thread translating process signals into lifecycle actions
#[derive(Debug)]
pub struct SignalWatcher {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    /// Install SIGINT/SIGTERM/SIGCHLD handling
    ///
    /// Handlers are registered before this returns, so a signal delivered
    /// afterwards is never lost.
    pub fn spawn(shutdown: ShutdownSignal) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (mut interrupt, mut terminate, mut child) = runtime.block_on(async {
            Ok::<_, io::Error>((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
                signal(SignalKind::child())?,
            ))
        })?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("signal-watcher".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            _ = interrupt.recv() => {
                                log::info!("SIGINT received, shutting down");
                                shutdown.trigger();
                            }
                            _ = terminate.recv() => {
                                log::info!("SIGTERM received, shutting down");
                                shutdown.trigger();
                            }
                            _ = child.recv() => reap_children(),
                            _ = &mut stop_rx => break,
                        }
                    }
                });
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop watching and join the thread
    pub fn stop(mut self) {
        self.shutdown_thread();
    }

    fn shutdown_thread(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Signal watcher thread panicked");
            }
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.shutdown_thread();
    }
}

/// Reap every child that has already exited
fn reap_children() {
    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        log::debug!("Reaped child process {}", pid);
    }
}
