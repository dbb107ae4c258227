use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fmt;
use std::thread;
use tokio::sync::mpsc;
use tracing::warn;

/// Which external interrupt stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    UserInterrupt,
    Termination,
}

impl InterruptKind {
    pub fn exit_code(&self) -> i32 {
        match self {
            InterruptKind::UserInterrupt => 130, // Standard exit code for SIGINT
            InterruptKind::Termination => 143,   // Standard exit code for SIGTERM
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::UserInterrupt => f.write_str("SIGINT"),
            InterruptKind::Termination => f.write_str("SIGTERM"),
        }
    }
}

/// Receiving end of the interrupt channel, polled by the run controller.
pub struct InterruptListener {
    receiver: mpsc::UnboundedReceiver<InterruptKind>,
}

impl InterruptListener {
    /// A listener fed by hand instead of by the OS.
    pub fn channel() -> (mpsc::UnboundedSender<InterruptKind>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }

    /// Wait for the next interrupt. Stays pending forever once every sender
    /// is gone, so a `select!` arm on it never fires spuriously.
    pub async fn recv(&mut self) -> InterruptKind {
        match self.receiver.recv().await {
            Some(kind) => kind,
            None => std::future::pending().await,
        }
    }

    /// An interrupt that has already arrived, without waiting.
    pub fn try_recv(&mut self) -> Option<InterruptKind> {
        self.receiver.try_recv().ok()
    }
}

/// Set up interrupt handlers for graceful shutdown
///
/// SIGINT and SIGTERM are forwarded from a dedicated thread to the returned
/// listener instead of ending the process, so the controller can run the
/// account cleanup before it exits.
pub fn setup_interrupt_handlers() -> Result<InterruptListener> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (sender, listener) = InterruptListener::channel();

    thread::spawn(move || {
        for sig in signals.forever() {
            let kind = match sig {
                SIGINT => InterruptKind::UserInterrupt,
                SIGTERM => InterruptKind::Termination,
                _ => continue,
            };
            warn!("Received {}, stopping after cleanup", kind);
            if sender.send(kind).is_err() {
                break;
            }
        }
    });

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(InterruptKind::UserInterrupt.exit_code(), 130);
        assert_eq!(InterruptKind::Termination.exit_code(), 143);
    }

    #[tokio::test]
    async fn test_listener_delivers_sent_interrupt() {
        let (sender, mut listener) = InterruptListener::channel();
        sender.send(InterruptKind::Termination).unwrap();
        assert_eq!(listener.recv().await, InterruptKind::Termination);
    }

    #[test]
    fn test_try_recv_sees_only_delivered_interrupts() {
        let (sender, mut listener) = InterruptListener::channel();
        assert_eq!(listener.try_recv(), None);

        sender.send(InterruptKind::UserInterrupt).unwrap();
        assert_eq!(listener.try_recv(), Some(InterruptKind::UserInterrupt));
        assert_eq!(listener.try_recv(), None);

        drop(sender);
        assert_eq!(listener.try_recv(), None);
    }

    #[tokio::test]
    async fn test_closed_listener_stays_pending() {
        let (sender, mut listener) = InterruptListener::channel();
        drop(sender);
        let waited = tokio::time::timeout(Duration::from_millis(50), listener.recv()).await;
        assert!(waited.is_err());
    }
}
