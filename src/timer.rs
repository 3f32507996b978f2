//! Performance measurement tools.

use std::{
    cell::Cell,
    fmt::{self, Arguments},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Weight given to each new measurement in the moving average.
const SMOOTHING: f32 = 0.1;

/// A timer that measures how long an operation takes, keeping an exponential moving average.
///
/// Displaying the timer using `{}` ([`std::fmt::Display`]) prints the number of recorded runs and
/// the average duration.
#[derive(Debug, Clone)]
pub struct Timer {
    name: &'static str,
    runs: u64,
    avg_ms: f32,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            runs: 0,
            avg_ms: 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the number of operations recorded so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Returns the moving average of the recorded durations, in milliseconds.
    pub fn average_ms(&self) -> f32 {
        self.avg_ms
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&mut self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&mut self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    /// Records the duration of one operation.
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_secs_f32() * 1000.0;
        if self.runs == 0 {
            self.avg_ms = ms;
        } else {
            self.avg_ms += (ms - self.avg_ms) * SMOOTHING;
        }
        self.runs += 1;
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}x{:.01}ms", self.name, self.runs, self.avg_ms)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a mut Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.start.elapsed());
    }
}

/// A [`Timer`] that can be updated through a shared reference from several threads.
///
/// The timed operation runs without holding the lock, so concurrent operations are not serialized.
/// Only recording the measured duration is.
#[derive(Debug)]
pub struct SharedTimer {
    timer: Mutex<Timer>,
}

impl SharedTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            timer: Mutex::new(Timer::new(name)),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = timee();
        self.lock().record(start.elapsed());
        result
    }

    /// Returns a snapshot of the timer.
    pub fn get(&self) -> Timer {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Logs frames per second with optional extra data.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS and `extra` data if one second has passed.
    pub fn tick_with<D: fmt::Display, I: IntoIterator<Item = D>>(&mut self, extra: I) {
        struct DisplayExtra<D: fmt::Display, I: Iterator<Item = D>>(Cell<Option<I>>);

        impl<D: fmt::Display, I: Iterator<Item = D>> fmt::Display for DisplayExtra<D, I> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let Some(mut iter) = self.0.take() else {
                    return Ok(());
                };
                match iter.next() {
                    Some(item) => {
                        write!(f, " ({}", item)?;
                        for item in iter {
                            write!(f, ", {}", item)?;
                        }
                        f.write_str(")")
                    }
                    None => Ok(()),
                }
            }
        }

        self.tick_impl(format_args!(
            "{}",
            DisplayExtra(Cell::new(Some(extra.into_iter())))
        ));
    }

    fn tick_impl(&mut self, args: Arguments<'_>) {
        self.frames += 1;
        if self.start.elapsed() > Duration::from_secs(1) {
            log::debug!("{}: {} FPS{}", self.name, self.frames, args);

            self.frames = 0;
            self.start = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn moving_average() {
        let mut timer = Timer::new("t");
        timer.record(Duration::from_millis(10));
        assert_relative_eq!(timer.average_ms(), 10.0);
        timer.record(Duration::from_millis(20));
        assert_relative_eq!(timer.average_ms(), 11.0, epsilon = 1e-4);
        assert_eq!(timer.runs(), 2);
        assert_eq!(timer.to_string(), "t: 2x11.0ms");
    }

    #[test]
    fn shared_timer_runs_concurrently() {
        use std::sync::Barrier;

        // Both closures must be running at the same time to get past the barrier.
        let timer = SharedTimer::new("shared");
        let barrier = Barrier::new(2);
        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| timer.time(|| barrier.wait()));
            }
        });
        assert_eq!(timer.get().runs(), 2);
        assert_eq!(timer.get().name(), "shared");
    }

    #[test]
    fn time_records_once() {
        let mut timer = Timer::new("t");
        assert_eq!(timer.time(|| 7), 7);
        assert_eq!(timer.runs(), 1);
    }
}
