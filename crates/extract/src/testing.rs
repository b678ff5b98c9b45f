//! Scripted completion backend for tests.
//!
//! ```rust
//! use extract::testing::ScriptedBackend;
//! use extract::BackendError;
//!
//! let backend = ScriptedBackend::new()
//!     .then_error(BackendError::Transient("rate limited".into()))
//!     .then_reply(r#"{"genes": ["TP53"]}"#);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::BackendError;
use crate::llm::{ChatRequest, CompletionBackend};

/// Plays back its script in order, then repeats the last entry.
#[derive(Default, Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Result<String, BackendError>>>>,
    last: Arc<Mutex<Option<Result<String, BackendError>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, entry: Result<String, BackendError>) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()))
    }

    pub fn then_error(self, error: BackendError) -> Self {
        self.push(Err(error))
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request.clone());

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(entry) => {
                *last = Some(entry.clone());
                entry
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(BackendError::Transient("script is empty".into()))),
        }
    }
}
