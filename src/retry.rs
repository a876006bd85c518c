use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Geometric reconnect delay for broker connections.
#[derive(Clone, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: u32, max_attempts: Option<u32>) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempt >= max) {
            return None;
        }

        let mut delay = self.initial;
        for _ in 0..self.attempt {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.max {
                break;
            }
        }
        self.attempt += 1;
        Some(delay.min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2, None)
    }
}

/// Sleeps for `delay`, waking early when `stop` is set. Returns `false` if
/// the sleep was cut short.
pub fn sleep_cancellable(delay: Duration, stop: &AtomicBool) -> bool {
    sleep_until(delay, || stop.load(Ordering::Relaxed))
}

/// Sleeps for `delay` as long as `running` stays set. Returns `false` if it
/// was cleared first.
pub fn sleep_while(delay: Duration, running: &AtomicBool) -> bool {
    sleep_until(delay, || !running.load(Ordering::Relaxed))
}

fn sleep_until(delay: Duration, interrupted: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if interrupted() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_then_cap() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2,
            None,
        );
        let delays: Vec<_> = (0..5).filter_map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_attempt_limit() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4), 2, Some(2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_cancelled_sleep_returns_early() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_cancellable(Duration::from_secs(10), &stop));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_while_wakes_when_flag_clears() {
        let running = std::sync::Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let clearer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::SeqCst);
        });

        let start = Instant::now();
        assert!(!sleep_while(Duration::from_secs(30), &running));
        assert!(start.elapsed() < Duration::from_secs(5));
        clearer.join().unwrap();

        running.store(true, Ordering::SeqCst);
        assert!(sleep_while(Duration::from_millis(20), &running));
    }

    #[test]
    fn test_full_sleep() {
        let stop = AtomicBool::new(false);
        assert!(sleep_cancellable(Duration::from_millis(20), &stop));
    }
}
