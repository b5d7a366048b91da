//! Shared test fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::bail;
use parking_lot::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::host::CommandProcessor;

/// [`CommandProcessor`] that records everything it receives.
///
/// Commands: `fail` errors, `zero` returns 0, `slow <ms>` sleeps first,
/// anything else returns 1.
#[derive(Clone, Default)]
pub struct RecordingProcessor {
    commands: Arc<Mutex<Vec<String>>>,
    broadcasts: Arc<Mutex<Vec<String>>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }
}

impl CommandProcessor for RecordingProcessor {
    fn perform_command(&mut self, command: &str) -> anyhow::Result<i32> {
        self.commands.lock().push(command.to_string());

        match command.split_once(' ') {
            Some(("slow", ms)) => {
                thread::sleep(Duration::from_millis(ms.parse()?));
                Ok(1)
            }
            _ if command == "fail" => bail!("command failed"),
            _ if command == "zero" => Ok(0),
            _ => Ok(1),
        }
    }

    fn broadcast(&mut self, message: &str) {
        self.broadcasts.lock().push(message.to_string());
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Tracing layer counting `ERROR` events
#[derive(Clone, Default)]
pub struct ErrorCounter(Arc<AtomicUsize>);

impl ErrorCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
