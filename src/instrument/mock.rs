//! Scripted counter for tests.
//!
//! Clones share state, so a test can hand one clone to the acquisition loop and
//! keep another to script responses and inspect what was sent.

use super::CounterDriver;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    responses: VecDeque<Result<String, String>>,
    fallback: Option<String>,
    commands: Vec<String>,
    failing_opens: usize,
    opens: usize,
    closes: usize,
}

/// A counter that answers from a script.
#[derive(Debug, Clone, Default)]
pub struct MockCounter {
    state: Arc<Mutex<MockState>>,
    delay: Duration,
}

impl MockCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer given once the script runs out.
    pub fn with_fallback(self, value: &str) -> Self {
        self.lock().fallback = Some(value.to_string());
        self
    }

    /// Queue a successful response.
    pub fn push_response(&self, value: &str) {
        self.lock().responses.push_back(Ok(value.to_string()));
    }

    /// Queue a transport failure.
    pub fn push_failure(&self, message: &str) {
        self.lock().responses.push_back(Err(message.to_string()));
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.lock().failing_opens = n;
    }

    /// Every command written or queried while open, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CounterDriver for MockCounter {
    async fn open(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(DaqError::Instrument("mock port busy".to_string()));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.lock();
        if !state.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        state.commands.push(command.to_string());
        Ok(())
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut state = self.lock();
        if !state.open {
            return Err(DaqError::SerialPortNotConnected);
        }
        state.commands.push(command.to_string());
        match state.responses.pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(DaqError::Instrument(message)),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| DaqError::Instrument("no scripted response".to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_in_script_order_then_fallback() {
        let mut counter = MockCounter::new().with_fallback("0.0");
        counter.push_response("1.0");
        counter.push_failure("timeout");
        counter.open().await.unwrap();

        assert_eq!(counter.query("XAVG?").await.unwrap(), "1.0");
        assert!(counter.query("XAVG?").await.is_err());
        assert_eq!(counter.query("XAVG?").await.unwrap(), "0.0");
    }

    #[tokio::test]
    async fn closed_counter_refuses_io() {
        let mut counter = MockCounter::new();
        counter.fail_next_opens(1);
        assert!(counter.open().await.is_err());
        assert!(matches!(
            counter.query("XAVG?").await,
            Err(DaqError::SerialPortNotConnected)
        ));
        counter.open().await.unwrap();
        counter.close().await.unwrap();
        counter.close().await.unwrap();
        assert_eq!(counter.open_count(), 1);
        assert_eq!(counter.close_count(), 1);
    }
}
