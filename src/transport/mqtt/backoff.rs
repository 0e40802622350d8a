//! Reconnect backoff policy (pure)
//!
//! rumqttc reconnects on the next `poll()` after a failure; the supervisor
//! only decides how long to wait first and when to stop trying.

use std::time::Duration;

/// Delays between reconnect attempts and an optional cap on their number
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delays for the first attempts, in order
    pub steps: Vec<Duration>,
    /// Delay once `steps` is exhausted
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: None,
            steps: [250, 500, 1000, 2000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            ceiling: Duration::from_secs(5),
        }
    }
}

/// What to do after a connection failure
#[derive(Debug, Clone, PartialEq)]
pub enum Retry {
    After { attempt: u32, delay: Duration },
    ShuttingDown,
    Exhausted { attempts: u32 },
}

impl Backoff {
    pub fn capped(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Wait before attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.steps.get(index).copied().unwrap_or(self.ceiling)
    }

    /// Decide the next step given the attempts already made (pure function)
    pub fn next(&self, attempts_made: u32, shutting_down: bool) -> Retry {
        if shutting_down {
            return Retry::ShuttingDown;
        }
        match self.max_attempts {
            Some(max) if attempts_made >= max => Retry::Exhausted {
                attempts: attempts_made,
            },
            _ => {
                let attempt = attempts_made + 1;
                Retry::After {
                    attempt,
                    delay: self.delay_for(attempt),
                }
            }
        }
    }

    /// How long `connect()` waits for the first ConnAck
    ///
    /// With a cap: the whole retry schedule plus 30s of slack. Without one: 60s.
    pub fn connect_timeout(&self) -> Duration {
        match self.max_attempts {
            Some(max) => {
                let schedule: Duration = (1..=max).map(|attempt| self.delay_for(attempt)).sum();
                schedule + Duration::from_secs(30)
            }
            None => Duration::from_secs(60),
        }
    }

    /// Attempt cap for log lines
    pub fn describe_cap(&self) -> String {
        self.max_attempts
            .map_or_else(|| "unlimited".to_string(), |max| max.to_string())
    }
}
