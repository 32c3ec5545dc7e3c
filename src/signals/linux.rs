use anyhow::Result;
use futures_util::future::poll_fn;
use std::task::{Context, Poll};
use tokio::signal::unix::{signal, Signal, SignalKind};

pub(crate) struct Terminate {
    /// For Ctrl+C from a terminal
    sigint: Signal,
    /// For systemd service stopping
    sigterm: Signal,
}

impl Terminate {
    pub(crate) fn new() -> Result<Self> {
        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;

        Ok(Self { sigint, sigterm })
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Poll::Ready(_) = self.sigint.poll_recv(cx) {
            Poll::Ready(())
        } else if let Poll::Ready(_) = self.sigterm.poll_recv(cx) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    /// Waits for SIGINT or SIGTERM
    pub(crate) async fn recv(&mut self) {
        poll_fn(|cx| self.poll_recv(cx)).await
    }
}
