use std::{future::Future, time::Instant};
use tracing::debug;

/// Awaits `future` and reports how long it took at `debug` level.
///
/// The elapsed wall time is attached to the event as the `duration_ms` field.
/// The output of `future` is returned unchanged, including errors.
pub async fn measure_time<Fut>(future: Fut, message: impl AsRef<str>) -> Fut::Output
where
    Fut: Future,
{
    let start = Instant::now();
    let output = future.await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    debug!(duration_ms, "{}", message.as_ref());

    output
}
