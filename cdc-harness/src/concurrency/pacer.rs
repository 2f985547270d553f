use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use crate::bail;
use crate::error::{ErrorKind, HarnessResult};

/// Spaces out units of work to approximate a rate.
///
/// Ticks are scheduled against fixed deadlines, so time spent in the work itself shortens the
/// next wait. Ticks missed while the work was stalled are not caught up: the schedule restarts
/// from the late tick, so an outage never turns into a burst above the rate.
#[derive(Debug)]
pub struct Pacer {
    interval: Option<Interval>,
}

impl Pacer {
    /// Creates a pacer for `rate` units per second; [`None`] disables pacing.
    ///
    /// Fails when the rate is so small that its period does not fit a [`Duration`].
    pub fn new(rate: Option<f64>) -> HarnessResult<Self> {
        let Some(rate) = rate.filter(|rate| *rate > 0.0) else {
            return Ok(Self { interval: None });
        };

        let Ok(period) = Duration::try_from_secs_f64(1.0 / rate) else {
            bail!(
                ErrorKind::InvalidData,
                "Insert rate is too small to pace",
                format!("{rate} rows/s per worker")
            );
        };

        let mut interval = tokio::time::interval(period.max(Duration::from_micros(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            interval: Some(interval),
        })
    }

    /// Returns the spacing between two ticks, if paced.
    pub fn period(&self) -> Option<Duration> {
        self.interval.as_ref().map(Interval::period)
    }

    /// Waits until the next unit of work may start.
    pub async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => tokio::task::yield_now().await,
        }
    }
}
