// src/utils/signals.rs: publish-before-death on termination signals

use std::io;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future;
use log::{debug, error, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::utils::publish::{PublishOptions, Publisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardState {
    Armed = 0,
    Handling = 1,
    Terminated = 2,
}

impl GuardState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GuardState::Armed,
            1 => GuardState::Handling,
            _ => GuardState::Terminated,
        }
    }
}

/// Catchable signals whose default action ends the process. SIGKILL and SIGSTOP cannot be caught
/// and SIGCHLD is left alone.
pub fn intercepted_signals(intercept_sigusr: bool) -> Vec<(i32, &'static str)> {
    let mut signals = vec![
        (libc::SIGHUP, "SIGHUP"),
        (libc::SIGINT, "SIGINT"),
        (libc::SIGQUIT, "SIGQUIT"),
        (libc::SIGTERM, "SIGTERM"),
        (libc::SIGALRM, "SIGALRM"),
        (libc::SIGXCPU, "SIGXCPU"),
        (libc::SIGXFSZ, "SIGXFSZ"),
        (libc::SIGVTALRM, "SIGVTALRM"),
        (libc::SIGPROF, "SIGPROF"),
    ];
    if intercept_sigusr {
        signals.push((libc::SIGUSR1, "SIGUSR1"));
        signals.push((libc::SIGUSR2, "SIGUSR2"));
    }
    signals
}

fn signal_name(signum: i32) -> &'static str {
    intercepted_signals(true)
        .into_iter()
        .find(|(num, _)| *num == signum)
        .map(|(_, name)| name)
        .unwrap_or("signal")
}

/// Armed -> Handling -> Terminated. Only the first signal publishes.
pub struct SignalGuard {
    state: Arc<AtomicU8>,
    /// Signals caught by a listener but not yet taken by the handler task.
    pending: Arc<AtomicUsize>,
    tasks: Vec<JoinHandle<()>>,
}

impl SignalGuard {
    /// Installs listeners for every intercepted signal and starts the handler task.
    pub fn arm(publisher: Arc<Publisher>, intercept_sigusr: bool) -> io::Result<Self> {
        let state = Arc::new(AtomicU8::new(GuardState::Armed as u8));
        let pending = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::channel::<i32>(16);
        let mut tasks = Vec::new();

        for (signum, name) in intercepted_signals(intercept_sigusr) {
            let mut stream = signal(SignalKind::from_raw(signum))?;
            let tx = tx.clone();
            let pending = pending.clone();
            debug!("Intercepting {}", name);
            tasks.push(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    pending.fetch_add(1, Ordering::SeqCst);
                    if tx.send(signum).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let handler_state = state.clone();
        let handler_pending = pending.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(signum) = rx.recv().await {
                let handled = handle_signal(&handler_state, &publisher, signum).await;
                handler_pending.fetch_sub(1, Ordering::SeqCst);
                if handled {
                    redeliver(signum);
                }
            }
        }));

        Ok(SignalGuard { state, pending, tasks })
    }

    pub fn state(&self) -> GuardState {
        GuardState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Parks the caller forever once a signal is being handled or queued for the handler, so the
    /// normal path cannot exit underneath the signal-path publish.
    pub async fn yield_to_handler(&self) {
        // Let listener tasks forward anything already delivered.
        tokio::task::yield_now().await;
        if self.state() != GuardState::Armed || self.pending.load(Ordering::SeqCst) > 0 {
            warn!("Signal handling in progress; deferring exit");
            future::pending::<()>().await;
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Runs the error-path publish for the first signal. Returns false for a re-entrant signal, which
/// is logged and ignored.
pub async fn handle_signal(state: &AtomicU8, publisher: &Publisher, signum: i32) -> bool {
    let name = signal_name(signum);
    if state
        .compare_exchange(GuardState::Armed as u8, GuardState::Handling as u8, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Caught {} while already handling a signal; ignoring", name);
        return false;
    }

    error!("Caught {}, uploading files before exiting", name);
    let report = publisher.publish(PublishOptions::error_path()).await;
    if let Err(e) = report.into_result() {
        error!("{}", e);
    }
    state.store(GuardState::Terminated as u8, Ordering::SeqCst);
    true
}

/// Restores the default disposition and raises the signal again so the process dies the usual way.
fn redeliver(signum: i32) {
    // SAFETY: resetting a disposition and raising a signal have no memory-safety preconditions.
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
    std::process::exit(128 + signum);
}
