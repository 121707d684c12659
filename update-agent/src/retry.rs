//! Fixed-delay retries for the network steps of a run.

use std::{fmt::Display, time::Duration};

use tracing::warn;

/// Blocks the current thread between two attempts.
pub trait Sleep {
    fn sleep(&self, duration: Duration);
}

/// Sleeps for real.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Returned once every attempt failed. Holds the error of the last attempt.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Never 0.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Calls `attempt` with the 1-based attempt number until it succeeds or the attempts run out.
    ///
    /// `delay` is slept between two attempts, never after the last one.
    pub fn run<T, E, F>(
        &self,
        sleep: &dyn Sleep,
        what: &str,
        mut attempt: F,
    ) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(err) if n >= max_attempts => {
                    warn!("{what}: attempt {n}/{max_attempts} failed: {err}");
                    return Err(Exhausted {
                        attempts: n,
                        last: err,
                    });
                }
                Err(err) => {
                    warn!(
                        "{what}: attempt {n}/{max_attempts} failed: {err}; retrying in {}s",
                        self.delay.as_secs()
                    );
                    sleep.sleep(self.delay);
                    n += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Records requested sleeps instead of sleeping.
    #[derive(Debug, Default)]
    struct RecordingSleep(RefCell<Vec<Duration>>);

    impl Sleep for RecordingSleep {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    #[test]
    fn first_success_stops_the_loop() {
        let sleep = RecordingSleep::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let mut calls = 0;
        let out: Result<_, Exhausted<String>> = policy.run(&sleep, "test", |n| {
            calls += 1;
            Ok(n)
        });
        assert_eq!(out.unwrap(), 1);
        assert_eq!(calls, 1);
        assert!(sleep.0.borrow().is_empty());
    }

    #[test]
    fn sleeps_between_attempts_but_not_after_the_last() {
        let sleep = RecordingSleep::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let out: Result<(), _> = policy.run(&sleep, "test", |n| Err(format!("boom {n}")));
        let err = out.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last, "boom 3");
        assert_eq!(*sleep.0.borrow(), vec![Duration::from_secs(10); 2]);
    }

    #[test]
    fn recovers_on_a_later_attempt() {
        let sleep = RecordingSleep::default();
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let out = policy.run(&sleep, "test", |n| {
            if n < 2 { Err("not yet") } else { Ok(n) }
        });
        assert_eq!(out.unwrap(), 2);
        assert_eq!(sleep.0.borrow().len(), 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let sleep = RecordingSleep::default();
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        let out: Result<(), _> = policy.run(&sleep, "test", |_| Err("nope"));
        assert_eq!(out.unwrap_err().attempts, 1);
        assert!(sleep.0.borrow().is_empty());
    }
}
