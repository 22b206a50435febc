use crate::cancel::Cancellation;
use crate::dependencytrack::{ClientError, TrackingClient, UploadToken};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep};
use tracing::debug;

/// How a poll loop ended. Exactly one is produced per upload token.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Completed,
    Failed(ClientError),
    TimedOut,
    Cancelled,
    /// The poll task itself panicked.
    Crashed(JoinError),
}

/// Aborts the poll task when the waiting caller is dropped.
struct PollTask(JoinHandle<PollOutcome>);

impl Drop for PollTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Waits for the server to finish processing `token`.
///
/// The loop runs in its own task whose join handle carries the single outcome
/// back. It races three things, first one wins:
/// - a tick every `check_interval` asking whether the token is still being
///   processed, the first tick one interval after the start
/// - the `upload_timeout` deadline, measured once from the start
/// - `cancellation`, observed between ticks; a request already in flight is
///   not interrupted
///
/// Dropping the returned future aborts the task.
pub(crate) async fn wait_until_processed<C>(
    client: Arc<C>,
    token: UploadToken,
    check_interval: Duration,
    upload_timeout: Duration,
    cancellation: Cancellation,
) -> PollOutcome
where
    C: TrackingClient + ?Sized + 'static,
{
    let mut task = PollTask(tokio::spawn(async move {
        poll(
            client.as_ref(),
            &token,
            check_interval,
            upload_timeout,
            cancellation,
        )
        .await
    }));

    match (&mut task.0).await {
        Ok(outcome) => outcome,
        Err(err) => PollOutcome::Crashed(err),
    }
}

async fn poll<C>(
    client: &C,
    token: &UploadToken,
    check_interval: Duration,
    upload_timeout: Duration,
    mut cancellation: Cancellation,
) -> PollOutcome
where
    C: TrackingClient + ?Sized,
{
    let check_interval = check_interval.max(Duration::from_millis(1));
    let deadline = sleep(upload_timeout);
    tokio::pin!(deadline);
    // a first tick beyond what Instant can represent never comes
    let mut ticker = Instant::now().checked_add(check_interval).map(|start| {
        let mut ticker = interval_at(start, check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => return PollOutcome::Cancelled,
            _ = &mut deadline => return PollOutcome::TimedOut,
            _ = next_tick(&mut ticker) => match client.is_processing(token).await {
                Err(err) => return PollOutcome::Failed(err),
                Ok(false) => return PollOutcome::Completed,
                Ok(true) => debug!(%token, "BOM is still being processed"),
            },
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
