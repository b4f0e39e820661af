//! Scripted in-memory transport for engine tests.

use super::Transport;
use crate::error::NetworkFailure;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const CHUNK: usize = 8 * 1024;

/// What a scripted URL does when fetched.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Deliver the body in chunks, then succeed.
    Body(Vec<u8>),
    /// Fail immediately with the given failure.
    Fail(NetworkFailure),
    /// Deliver `prefix`, then stall until cancelled.
    Stall { prefix: Vec<u8> },
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub(crate) fn body(&self, url: &str, len: usize) -> Vec<u8> {
        let body: Vec<u8> = (0u8..251).cycle().take(len).collect();
        self.script(url, Script::Body(body.clone()));
        body
    }

    /// Number of times `url` has been fetched.
    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Transport for ScriptedTransport {
    fn fetch(
        &self,
        url: &str,
        cancel: &AtomicBool,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<(), NetworkFailure> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Script::Fail(NetworkFailure::Http(404)));
        match script {
            Script::Body(body) => {
                for chunk in body.chunks(CHUNK) {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(NetworkFailure::Aborted);
                    }
                    on_chunk(chunk);
                }
                Ok(())
            }
            Script::Fail(failure) => Err(failure),
            Script::Stall { prefix } => {
                on_chunk(&prefix);
                while !cancel.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(NetworkFailure::Aborted)
            }
        }
    }
}
