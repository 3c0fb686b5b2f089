//! Scripted in-memory control service for unit tests

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ApiError;
use crate::models::ProxiesResponse;

use super::client::ControlApi;

#[derive(Default)]
struct FakeInner {
    directory: ProxiesResponse,
    fail_listing: bool,
    /// Per-endpoint queue of delay answers; `None` answers with an error
    delays: HashMap<String, VecDeque<Option<u32>>>,
    /// Answer once a queue runs dry
    steady: HashMap<String, Option<u32>>,
    delay_calls: HashMap<String, usize>,
    fail_switch: bool,
    switches: Vec<(String, String)>,
}

#[derive(Default)]
pub struct FakeControlApi {
    inner: Mutex<FakeInner>,
}

impl FakeControlApi {
    pub fn new(directory: ProxiesResponse) -> Self {
        let fake = Self::default();
        fake.inner.lock().directory = directory;
        fake
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inner.lock().fail_listing = fail;
    }

    pub fn fail_switch(&self, fail: bool) {
        self.inner.lock().fail_switch = fail;
    }

    /// Answer every delay test for `name` with `delay`
    pub fn set_delay(&self, name: &str, delay: Option<u32>) {
        let mut inner = self.inner.lock();
        inner.delays.remove(name);
        inner.steady.insert(name.to_string(), delay);
    }

    /// Answer the next delay tests for `name` in order
    pub fn script_delays(&self, name: &str, delays: &[Option<u32>]) {
        self.inner
            .lock()
            .delays
            .insert(name.to_string(), delays.iter().copied().collect());
    }

    pub fn delay_calls(&self, name: &str) -> usize {
        self.inner.lock().delay_calls.get(name).copied().unwrap_or(0)
    }

    pub fn switches(&self) -> Vec<(String, String)> {
        self.inner.lock().switches.clone()
    }
}

#[async_trait]
impl ControlApi for FakeControlApi {
    async fn list_proxies(&self) -> Result<ProxiesResponse, ApiError> {
        let inner = self.inner.lock();
        if inner.fail_listing {
            return Err(ApiError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(inner.directory.clone())
    }

    async fn proxy_delay(
        &self,
        name: &str,
        _test_url: &str,
        _timeout: Duration,
    ) -> Result<u32, ApiError> {
        let mut inner = self.inner.lock();
        *inner.delay_calls.entry(name.to_string()).or_default() += 1;
        let scripted = inner.delays.get_mut(name).and_then(|q| q.pop_front());
        let answer = match scripted {
            Some(answer) => answer,
            None => inner.steady.get(name).copied().flatten(),
        };
        answer.ok_or_else(|| ApiError::Status {
            status: 504,
            body: "timeout".into(),
        })
    }

    async fn switch_proxy(&self, selector: &str, name: &str) -> Result<(), ApiError> {
        let mut inner = self.inner.lock();
        if inner.fail_switch {
            return Err(ApiError::Status {
                status: 500,
                body: "switch refused".into(),
            });
        }
        inner.switches.push((selector.to_string(), name.to_string()));
        Ok(())
    }
}
