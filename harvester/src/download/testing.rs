//! Scripted transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::DownloadResult;
use super::transport::{Transport, TransportResponse};

/// A canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    body: Vec<u8>,
    content_length: Option<u64>,
    fail_after: Option<usize>,
    read_delay: Duration,
}

impl Reply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            body,
            fail_after: None,
            read_delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_length: Some(0),
            ..Self::ok(Vec::new())
        }
    }

    /// Body that errors after `n` bytes.
    pub fn fail_after(body: Vec<u8>, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::ok(body)
        }
    }

    /// Body whose every read sleeps first.
    pub fn slow(body: Vec<u8>, read_delay: Duration) -> Self {
        Self {
            read_delay,
            ..Self::ok(body)
        }
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }
}

struct ScriptedBody {
    inner: Cursor<Vec<u8>>,
    fail_after: Option<usize>,
    read_delay: Duration,
}

impl Read for ScriptedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        let pos = self.inner.position() as usize;
        match self.fail_after {
            Some(limit) if pos >= limit => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
            Some(limit) => {
                let max = (limit - pos).min(buf.len()).min(1024);
                self.inner.read(&mut buf[..max])
            }
            None => {
                let max = buf.len().min(1024);
                self.inner.read(&mut buf[..max])
            }
        }
    }
}

/// Transport serving scripted replies per URL.
///
/// Replies are consumed in order; the last one repeats. Unknown URLs get 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<HashMap<String, usize>>,
    /// Flag raised when the named URL is requested.
    cancel_on: Option<(String, Arc<AtomicBool>)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Raise `flag` when `url` is requested, as a Ctrl+C mid-transfer would.
    pub fn cancel_on(mut self, url: &str, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on = Some((url.to_string(), flag));
        self
    }

    /// Number of GETs issued for `url`.
    pub fn requests(&self, url: &str) -> usize {
        self.requests.lock().get(url).copied().unwrap_or(0)
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> DownloadResult<TransportResponse> {
        *self.requests.lock().entry(url.to_string()).or_default() += 1;
        if let Some((trigger, flag)) = &self.cancel_on {
            if trigger == url {
                flag.store(true, Ordering::SeqCst);
            }
        }

        let reply = {
            let mut replies = self.replies.lock();
            match replies.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        }
        .unwrap_or_else(|| Reply::status(404));

        Ok(TransportResponse {
            status: reply.status,
            content_length: reply.content_length,
            retry_after: None,
            body: Box::new(ScriptedBody {
                inner: Cursor::new(reply.body),
                fail_after: reply.fail_after,
                read_delay: reply.read_delay,
            }),
        })
    }
}
