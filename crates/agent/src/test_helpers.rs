//! Scripted generator mocks for executor tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use docuagent_core::{GenerateRequest, Generator, GeneratorError};

/// A generator that replays a fixed script of responses, one per call.
///
/// When the script runs out it either repeats the last entry (repeating
/// mode, for "model always does X" termination tests) or returns
/// `GeneratorError::Empty`.
pub struct SequentialMockGenerator {
    script: Mutex<VecDeque<Result<String, GeneratorError>>>,
    repeat_last: Option<Result<String, GeneratorError>>,
    calls: AtomicUsize,
}

impl SequentialMockGenerator {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            repeat_last: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay a script that may include failures.
    pub fn scripted(responses: Vec<Result<String, GeneratorError>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            repeat_last: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay the script, then keep returning `last` forever.
    pub fn repeating<S: Into<String>>(responses: Vec<S>, last: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            repeat_last: Some(Ok(last.into())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails with a network error.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat_last: Some(Err(GeneratorError::Network("mock failure".into()))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for SequentialMockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<String, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(response) => response,
            None => match &self.repeat_last {
                Some(repeated) => repeated.clone(),
                None => Err(GeneratorError::Empty),
            },
        }
    }
}
