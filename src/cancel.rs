//! Cooperative cancellation for long-running loops.

use crate::task::TaskError;
use std::{
    io::BufRead,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

pub const DEFAULT_POLL_INTERVAL: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn poller(&self, interval: usize) -> Poller {
        Poller {
            token: self.clone(),
            interval: interval.max(1),
            counter: 0,
        }
    }
}

/// Checks the token once every `interval` ticks.
#[derive(Debug)]
pub struct Poller {
    token: CancellationToken,
    interval: usize,
    counter: usize,
}

impl Poller {
    pub fn tick(&mut self) -> Result<(), TaskError> {
        self.counter += 1;
        if self.counter % self.interval == 0 {
            self.token.check()
        } else {
            Ok(())
        }
    }

    pub fn ticks(&self) -> usize {
        self.counter
    }
}

/// Reads all lines, polling for cancellation every `interval` lines.
pub fn read_lines_cancellable<R: BufRead>(
    reader: R,
    token: &CancellationToken,
    interval: usize,
) -> Result<Vec<String>, TaskError> {
    let mut poller = token.poller(interval);
    let mut lines = Vec::new();
    for line in reader.lines() {
        poller.tick()?;
        let line = line.map_err(|e| TaskError::Execution(format!("Read failed: {e}")))?;
        lines.push(line);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_poller_checks_at_cadence() {
        let token = CancellationToken::new();
        let mut poller = token.poller(3);
        poller.tick().unwrap();
        token.cancel();
        assert!(poller.tick().is_ok());
        assert!(matches!(poller.tick(), Err(TaskError::Cancelled)));
        assert_eq!(poller.ticks(), 3);
    }

    #[test]
    fn test_read_lines_until_cancelled() {
        let text = "a\nb\nc\n";
        let token = CancellationToken::new();
        let lines = read_lines_cancellable(Cursor::new(text), &token, 1).unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);

        token.cancel();
        let result = read_lines_cancellable(Cursor::new(text), &token, 2);
        assert!(matches!(result, Err(TaskError::Cancelled)));
    }

    #[test]
    fn test_zero_interval_is_treated_as_every_tick() {
        let token = CancellationToken::new();
        token.cancel();
        let mut poller = token.poller(0);
        assert!(poller.tick().is_err());
    }
}
