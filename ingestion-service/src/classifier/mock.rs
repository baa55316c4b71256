//! Mock provider implementation for testing.

use super::{CategoryProvider, ClassifierError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Mock category provider driven by canned responses.
pub struct MockCategoryProvider {
    fixed: Option<String>,
    fail_on: Option<String>,
    script: Mutex<VecDeque<Result<String, ClassifierError>>>,
    calls: AtomicUsize,
}

impl MockCategoryProvider {
    /// Answer every prompt with the same raw text.
    pub fn always(response: &str) -> Self {
        Self {
            fixed: Some(response.to_string()),
            fail_on: None,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Like [`Self::always`], but prompts containing `pattern` fail.
    /// Batches land in any order, so failure injection keys off content.
    pub fn failing_on(pattern: &str, response: &str) -> Self {
        Self {
            fixed: Some(response.to_string()),
            fail_on: Some(pattern.to_string()),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer prompts in order from a script; exhausting it is an error.
    pub fn script(responses: Vec<Result<String, ClassifierError>>) -> Self {
        Self {
            fixed: None,
            fail_on: None,
            script: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of prompts this provider has served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CategoryProvider for MockCategoryProvider {
    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(pattern) = &self.fail_on {
            if prompt.contains(pattern.as_str()) {
                return Err(ClassifierError::ApiError(format!(
                    "injected failure for {pattern}"
                )));
            }
        }

        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }

        self.script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ClassifierError::ApiError(
                    "mock script exhausted".to_string(),
                ))
            })
    }

    async fn health_check(&self) -> Result<(), ClassifierError> {
        Ok(())
    }
}
