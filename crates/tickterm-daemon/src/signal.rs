use tokio::sync::watch;

/// Edge-triggered broadcast: each [`Signal::fire`] wakes every subscriber
/// that is waiting or has subscribed before the fire.
///
/// A fresh subscription starts "clear", so a wait only reacts to fires that
/// happen after it began.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<u64>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    pub fn fire(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn subscribe(&self) -> SignalListener {
        let rx = self.tx.subscribe();
        let seen = *rx.borrow();
        SignalListener { rx, seen }
    }
}

#[derive(Debug)]
pub struct SignalListener {
    rx: watch::Receiver<u64>,
    seen: u64,
}

impl SignalListener {
    /// True if the signal fired since subscription or the last `fired().await`.
    pub fn is_set(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Resolves on the next fire. Never resolves if the signal is dropped.
    pub async fn fired(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        self.seen = *self.rx.borrow_and_update();
    }

    /// Clears the listener without waiting. Returns whether it had fired.
    pub fn take(&mut self) -> bool {
        let generation = *self.rx.borrow_and_update();
        let fired = generation != self.seen;
        self.seen = generation;
        fired
    }
}
