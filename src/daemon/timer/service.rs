use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    daemon::{mirror::MirrorSender, storage::entities::TimerRecord},
    utils::clock::Clock,
};

use super::{ticker::Tick, TimerAuthority, TimerSettings, TimerSnapshot};

const COMMAND_BUFFER: usize = 32;
/// Ticks are droppable, a small buffer is enough.
const TICK_BUFFER: usize = 4;

/// State-changing requests. Each one is idempotent with respect to the resulting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Stop,
    Reset,
    SetElapsed(u64),
}

#[derive(Debug)]
enum Command {
    Query(oneshot::Sender<TimerSnapshot>),
    Record(oneshot::Sender<TimerRecord>),
    Apply(Transition, oneshot::Sender<()>),
}

/// Cloneable entry point to the timer service. Any number of clients may hold one; their commands
/// are applied one at a time in arrival order.
#[derive(Clone)]
pub struct TimerHandle {
    sender: mpsc::Sender<Command>,
}

impl TimerHandle {
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| anyhow!("Timer service is not running"))?;
        response
            .await
            .map_err(|_| anyhow!("Timer service stopped before replying"))
    }

    pub async fn query(&self) -> Result<TimerSnapshot> {
        self.call(Command::Query).await
    }

    /// Current state in its persisted shape, including the start epoch.
    pub async fn record(&self) -> Result<TimerRecord> {
        self.call(Command::Record).await
    }

    pub async fn apply(&self, transition: Transition) -> Result<()> {
        self.call(|reply| Command::Apply(transition, reply)).await
    }

    pub async fn start(&self) -> Result<()> {
        self.apply(Transition::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.apply(Transition::Stop).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.apply(Transition::Reset).await
    }
}

/// Runs the [TimerAuthority]. Commands and ticks go through one loop, so the state is never
/// touched by two handlers at once.
pub struct TimerService {
    authority: TimerAuthority,
    commands: mpsc::Receiver<Command>,
    ticks: mpsc::Receiver<Tick>,
    handle: TimerHandle,
    shutdown: CancellationToken,
}

impl TimerService {
    pub fn new(
        settings: TimerSettings,
        clock: Arc<dyn Clock>,
        mirror: MirrorSender,
        shutdown: CancellationToken,
    ) -> Self {
        let (command_sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (tick_sender, ticks) = mpsc::channel(TICK_BUFFER);
        Self {
            authority: TimerAuthority::new(settings, clock, mirror, tick_sender),
            commands,
            ticks,
            handle: TimerHandle {
                sender: command_sender,
            },
            shutdown,
        }
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Must be called once, before [run](Self::run).
    pub fn restore(&mut self, persisted: Option<TimerRecord>) {
        self.authority.restore(persisted);
    }

    /// Executes the service loop until shutdown, then flushes the final state to the mirror.
    pub async fn run(self) {
        let Self {
            mut authority,
            mut commands,
            mut ticks,
            handle,
            shutdown,
        } = self;
        // Our own handle must not keep the command channel open.
        drop(handle);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => handle_command(&mut authority, command),
                    None => break,
                },
                Some(tick) = ticks.recv() => authority.tick(tick),
            }
        }

        authority.shutdown();
        info!("Timer service stopped");
    }
}

fn handle_command(authority: &mut TimerAuthority, command: Command) {
    // A caller that went away before the reply is not an error for the service.
    match command {
        Command::Query(reply) => {
            let _ = reply.send(authority.query());
        }
        Command::Record(reply) => {
            let _ = reply.send(authority.record());
        }
        Command::Apply(transition, reply) => {
            debug!("Applying {transition:?}");
            match transition {
                Transition::Start => {
                    authority.start();
                }
                Transition::Stop => {
                    authority.stop();
                }
                Transition::Reset => authority.reset(),
                Transition::SetElapsed(elapsed_ms) => authority.set_elapsed(elapsed_ms),
            }
            let _ = reply.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::Utc;
    use futures::future::join_all;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            mirror::{mirror_channel, store_writer::StoreWriter, MirrorModule},
            storage::{
                entities::TimerRecord,
                error::StoreError,
                memory::MemoryStore,
                store::{MockStore, Store},
            },
            timer::{TimerSettings, TimerSnapshot},
        },
        utils::{
            clock::{Clock, TestClock},
            logging::TEST_LOGGING,
        },
    };

    use super::{TimerHandle, TimerService, Transition};

    struct Running {
        handle: TimerHandle,
        shutdown: CancellationToken,
        tasks: tokio::task::JoinHandle<()>,
    }

    impl Running {
        async fn finish(self) {
            self.shutdown.cancel();
            self.tasks.await.unwrap();
        }
    }

    async fn spawn_service(store: Arc<dyn Store>, clock: TestClock) -> Running {
        let shutdown = CancellationToken::new();
        let (mirror, receiver) = mirror_channel();
        let mut service = TimerService::new(
            TimerSettings::default(),
            Arc::new(clock),
            mirror,
            shutdown.clone(),
        );
        service.restore(store.get_timer().await.unwrap_or(None));
        let handle = service.handle();
        let writer = MirrorModule::new(receiver, StoreWriter::new(store));
        let tasks = tokio::spawn(async move {
            tokio::join!(service.run(), writer.run());
        });
        Running {
            handle,
            shutdown,
            tasks,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_rate_is_bounded() {
        *TEST_LOGGING;
        let store = Arc::new(MemoryStore::with_timer(TimerRecord::zero()));
        let running = spawn_service(store.clone(), TestClock::starting_at(Utc::now())).await;

        running.handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        running.handle.stop().await.unwrap();
        running.finish().await;

        // One write for start, about one per second of running, one for stop and one for the
        // shutdown flush. Queued records may be coalesced, never multiplied.
        let writes = store.timer_writes();
        assert!((10..=14).contains(&writes), "{writes} writes");

        let stored = store.stored_timer().unwrap();
        assert!(!stored.running);
        assert!((9_900..=10_100).contains(&stored.elapsed_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_continuity() {
        let clock = TestClock::starting_at(Utc::now());
        let written_at = clock.epoch_ms();
        let store = Arc::new(MemoryStore::with_timer(TimerRecord::new(
            5_000,
            true,
            Some(written_at - 5_000),
        )));

        // The process is gone for three seconds.
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        let running = spawn_service(store.clone(), clock).await;
        let state = running.handle.query().await.unwrap();
        assert!(state.running);
        assert!((7_900..=8_100).contains(&state.elapsed_ms), "{state:?}");
        running.finish().await;

        let stored = store.stored_timer().unwrap();
        assert!(stored.running);
        assert_eq!(stored.start_epoch_ms, Some(written_at - 5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_store_never_blocks_transitions() {
        let mut store = MockStore::new();
        store
            .expect_get_timer()
            .returning(|| Err(StoreError::Io(std::io::Error::other("unavailable"))));
        store
            .expect_put_timer()
            .returning(|_| Err(StoreError::Io(std::io::Error::other("read-only"))));

        let running = spawn_service(Arc::new(store), TestClock::starting_at(Utc::now())).await;
        let handle = &running.handle;

        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        let state = handle.query().await.unwrap();
        assert!(state.running);
        assert!((1_900..=2_000).contains(&state.elapsed_ms), "{state:?}");

        handle.stop().await.unwrap();
        assert!(!handle.query().await.unwrap().running);

        handle.reset().await.unwrap();
        assert_eq!(
            handle.query().await.unwrap(),
            TimerSnapshot {
                elapsed_ms: 0,
                running: false
            }
        );
        running.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_clients_keep_state_consistent() {
        let store = Arc::new(MemoryStore::default());
        let clock = TestClock::starting_at(Utc::now());
        let running = spawn_service(store.clone(), clock.clone()).await;

        for round in 0..5u64 {
            let calls = (0..8).map(|i| {
                let handle = running.handle.clone();
                let transition = if (i + round) % 3 == 0 {
                    Transition::Stop
                } else {
                    Transition::Start
                };
                async move { handle.apply(transition).await }
            });
            for result in join_all(calls).await {
                result.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(250)).await;

            let record = running.handle.record().await.unwrap();
            match record.start_epoch_ms {
                Some(start) => {
                    assert!(record.running);
                    let expected = (clock.epoch_ms() - start) as u64;
                    assert!(expected - record.elapsed_ms <= 100, "{record:?}");
                }
                None => assert!(!record.running),
            }
        }
        running.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_fails_after_shutdown() {
        let running = spawn_service(
            Arc::new(MemoryStore::default()),
            TestClock::starting_at(Utc::now()),
        )
        .await;
        let handle = running.handle.clone();
        running.finish().await;

        assert!(handle.query().await.is_err());
    }
}
