//! Wiremock helpers for generator tests.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use serde_json::{Value, json};
use wiremock::ResponseTemplate;

struct SequentialResponderState {
    responses: Vec<ResponseTemplate>,
    call_count: AtomicUsize,
}

/// A wiremock responder that returns different responses on successive calls.
///
/// After exhausting the list it repeats the last response. Clone it before
/// mounting to read the call count afterwards.
#[derive(Clone)]
pub struct SequentialResponder {
    state: Arc<SequentialResponderState>,
}

impl SequentialResponder {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(
            !responses.is_empty(),
            "SequentialResponder requires at least one response"
        );
        Self {
            state: Arc::new(SequentialResponderState {
                responses,
                call_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail `fail_count` times with a 500, then return `success_response`.
    pub fn fail_then_succeed(fail_count: usize, success_response: ResponseTemplate) -> Self {
        let mut responses: Vec<_> = (0..fail_count).map(|_| server_error()).collect();
        responses.push(success_response);
        Self::new(responses)
    }

    pub fn always_fail() -> Self {
        Self::new(vec![server_error()])
    }

    pub fn call_count(&self) -> usize {
        self.state.call_count.load(Ordering::SeqCst)
    }
}

impl wiremock::Respond for SequentialResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let count = self.state.call_count.fetch_add(1, Ordering::SeqCst);
        let idx = count.min(self.state.responses.len() - 1);
        self.state.responses[idx].clone()
    }
}

fn server_error() -> ResponseTemplate {
    ResponseTemplate::new(500)
        .insert_header("content-type", "application/json")
        .set_body_json(json!({
            "error": {
                "type": "server_error",
                "message": "Internal server error. Please try again later.",
                "code": "internal_error"
            }
        }))
}

/// A chat completions response body whose single choice contains `content`.
pub fn chat_completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_735_689_600,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200 }
    })
}
