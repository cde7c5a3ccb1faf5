use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, trace_span, Instrument};

use crate::utils::clock::Clock;

/// Periodic wake-up delivered to the timer service. `generation` identifies the [Ticker] that
/// produced it, so ticks from a ticker that was already replaced can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub generation: u64,
}

/// Handle to a running tick source. The background task stops as soon as the handle is dropped,
/// so holding at most one `Ticker` means at most one tick source.
pub struct Ticker {
    generation: u64,
    token: CancellationToken,
}

impl Ticker {
    pub fn spawn(
        generation: u64,
        period: Duration,
        clock: Arc<dyn Clock>,
        sender: mpsc::Sender<Tick>,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let span = trace_span!("ticker", generation);

        tokio::spawn(
            async move {
                let mut deadline = clock.instant();
                loop {
                    // A stalled service should not receive a burst of overdue ticks.
                    deadline = (deadline + period).max(clock.instant());

                    tokio::select! {
                        _ = cancelled.cancelled() => break,
                        _ = clock.sleep_until(deadline) => (),
                    }

                    match sender.try_send(Tick { generation }) {
                        Ok(_) => (),
                        Err(TrySendError::Full(_)) => trace!("Service is busy, skipping tick"),
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
                debug!("Ticker stopped");
            }
            .instrument(span),
        );

        Self { generation, token }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
