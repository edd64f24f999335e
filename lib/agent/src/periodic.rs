use async_trait::async_trait;
use common::util::time::format_duration;
use getset::CopyGetters;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The body of a periodic task. Implementors only describe what happens on
/// one tick; [`run_periodic`] owns the timer and the race against
/// cancellation.
///
/// A tick must never fail: errors are logged inside `tick` and the loop moves
/// on to the next interval.
#[async_trait]
pub trait PeriodicTask: Send {
    fn name(&self) -> &'static str;

    async fn tick(&mut self);
}

/// What a periodic task did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TickReport {
    name: &'static str,
    ticks: u64,
}

/// Drive `task` every `period` until `token` is cancelled.
///
/// The first tick fires one full period after the call. Each iteration is a
/// single wait on whichever of {next tick, cancellation} comes first; if both
/// are ready, cancellation wins and the tick is not run. A tick that is in
/// progress when cancellation arrives runs to completion. A tick that overruns
/// its period delays the following one instead of bunching up.
pub async fn run_periodic<T: PeriodicTask>(
    mut task: T,
    period: Duration,
    token: CancellationToken,
) -> TickReport {
    let name = task.name();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(task = name, period = %format_duration(period), "Periodic task running");

    let mut ticks = 0;
    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            _ = ticker.tick() => {
                // Cancelled between the two polls.
                if token.is_cancelled() {
                    break;
                }
                debug!(task = name, tick = ticks + 1, "Tick");
                task.tick().await;
                ticks += 1;
            }
        }
    }

    info!(task = name, ticks, "Periodic task stopped");
    TickReport { name, ticks }
}
