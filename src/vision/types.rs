use std::collections::VecDeque;
use std::sync::Mutex;

use super::VisionError;

/// Boundary to a cloud vision-language model.
///
/// Implementations are injected at construction time (no hidden
/// singleton) and carry their own credential. Network-bound and fallible;
/// callers must fail open or fall back.
pub trait VisionClient: Send + Sync {
    /// Whether the service can be attempted at all (credential present).
    /// Network reachability is not probed here — transport failures are
    /// handled per call.
    fn is_available(&self) -> bool;

    /// Send a prompt plus one PNG image and return the raw text reply.
    fn generate_with_image(
        &self,
        prompt: &str,
        system: Option<&str>,
        image_png: &[u8],
    ) -> Result<String, VisionError>;
}

// ──────────────────────────────────────────────
// MockVisionClient (testing)
// ──────────────────────────────────────────────

/// Scripted vision client for tests.
///
/// Replies with queued responses in order, then repeats the last one.
/// `failing()` makes every call error, `unavailable()` reports the
/// service as not configured.
pub struct MockVisionClient {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    available: bool,
    fail: bool,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(response.to_string()),
            available: true,
            fail: false,
        }
    }

    /// Queue responses returned by successive calls, in order.
    pub fn with_responses(responses: &[&str]) -> Self {
        let mut queue: VecDeque<String> = responses.iter().map(|s| s.to_string()).collect();
        let last = queue.back().cloned().unwrap_or_default();
        if let Some(front) = queue.pop_front() {
            queue.push_front(front);
        }
        Self {
            responses: Mutex::new(queue),
            last: Mutex::new(last),
            available: true,
            fail: false,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl VisionClient for MockVisionClient {
    fn is_available(&self) -> bool {
        self.available
    }

    fn generate_with_image(
        &self,
        _prompt: &str,
        _system: Option<&str>,
        _image_png: &[u8],
    ) -> Result<String, VisionError> {
        if self.fail {
            return Err(VisionError::Connection("mock connection failure".into()));
        }
        let mut queue = self.responses.lock().expect("mock lock");
        match queue.pop_front() {
            Some(next) => {
                *self.last.lock().expect("mock lock") = next.clone();
                Ok(next)
            }
            None => Ok(self.last.lock().expect("mock lock").clone()),
        }
    }
}
