use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use futures_core::Stream;
use http::Method;
use hyper::body::{Body, Incoming};
use serde::de::DeserializeOwned;
use tokio::time::Sleep;
use tracing::warn;

use crate::GatewayResult;
use crate::error::GatewayError;
use crate::executor::RequestExecutor;
use crate::request::RequestDescriptor;
use crate::util::truncate_body;

type ReissueFuture = Pin<Box<dyn Future<Output = GatewayResult<Incoming>> + Send>>;

enum SequenceState {
    Streaming(Incoming),
    Reissuing(ReissueFuture),
    Drained,
}

/// Lazily decoded sequence of JSON values read off a response body.
///
/// Elements are emitted as soon as their bytes arrive; the body is never
/// buffered to completion. Pull-based: a consumer that stops polling
/// stops the socket read. The originating call's aggregate deadline keeps
/// applying to every element, and a mid-stream failure reissues the whole
/// exchange while retry budget remains, re-emitting from the fresh body.
pub struct JsonSequence<T> {
    state: SequenceState,
    framer: ValueFramer,
    executor: RequestExecutor,
    method: Method,
    url: String,
    request_body: Option<Bytes>,
    retries_left: u32,
    deadline: Pin<Box<Sleep>>,
    budget_ms: u128,
    done: bool,
    _target: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for JsonSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSequence")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("retries_left", &self.retries_left)
            .field("budget_ms", &self.budget_ms)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T> JsonSequence<T> {
    pub(crate) fn new(
        executor: RequestExecutor,
        descriptor: &RequestDescriptor,
        response: Incoming,
        deadline: Instant,
        budget_ms: u128,
        retries_left: u32,
    ) -> Self {
        Self {
            state: SequenceState::Streaming(response),
            framer: ValueFramer::new(),
            executor,
            method: descriptor.method().clone(),
            url: descriptor.url().to_owned(),
            request_body: descriptor.body().cloned(),
            retries_left,
            deadline: Box::pin(tokio::time::sleep_until(deadline.into())),
            budget_ms,
            done: false,
            _target: PhantomData,
        }
    }

    /// Consumes one retry by reissuing the whole exchange, or hands the
    /// error back once the budget is spent.
    fn fail(&mut self, error: GatewayError) -> Option<GatewayError> {
        if self.retries_left == 0 {
            self.done = true;
            return Some(error);
        }
        self.retries_left -= 1;
        warn!(
            method = %self.method,
            uri = %self.url,
            retries_left = self.retries_left,
            code = error.code().as_str(),
            error = %error,
            "reissuing sequence call after failure"
        );
        self.framer.reset();
        let executor = self.executor;
        let method = self.method.clone();
        let url = self.url.clone();
        let request_body = self.request_body.clone();
        self.state = SequenceState::Reissuing(Box::pin(async move {
            executor.open_exchange(&url, request_body, method).await
        }));
        None
    }
}

impl<T> Stream for JsonSequence<T>
where
    T: DeserializeOwned,
{
    type Item = GatewayResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if this.deadline.as_mut().poll(cx).is_ready() {
                this.done = true;
                return Poll::Ready(Some(Err(GatewayError::Timeout {
                    budget_ms: this.budget_ms,
                    method: this.method.clone(),
                    uri: this.url.clone(),
                })));
            }

            if let SequenceState::Reissuing(future) = &mut this.state {
                match future.as_mut().poll(cx) {
                    Poll::Ready(Ok(body)) => {
                        this.state = SequenceState::Streaming(body);
                        continue;
                    }
                    Poll::Ready(Err(error)) => match this.fail(error) {
                        Some(error) => return Poll::Ready(Some(Err(error))),
                        None => continue,
                    },
                    Poll::Pending => return Poll::Pending,
                }
            }

            let at_end = matches!(this.state, SequenceState::Drained);
            if let Some(raw) = this.framer.next_value(at_end) {
                match serde_json::from_slice(&raw) {
                    Ok(value) => return Poll::Ready(Some(Ok(value))),
                    Err(source) => {
                        let error = GatewayError::Decode {
                            source,
                            body: truncate_body(&raw),
                        };
                        match this.fail(error) {
                            Some(error) => return Poll::Ready(Some(Err(error))),
                            None => continue,
                        }
                    }
                }
            }
            if at_end {
                this.done = true;
                return Poll::Ready(None);
            }

            let SequenceState::Streaming(body) = &mut this.state else {
                continue;
            };
            match Pin::new(body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Some(data) = frame.data_ref() {
                        this.framer.push(data);
                    }
                }
                Poll::Ready(Some(Err(source))) => {
                    let error = GatewayError::ReadBody {
                        source: Box::new(source),
                    };
                    match this.fail(error) {
                        Some(error) => return Poll::Ready(Some(Err(error))),
                        None => continue,
                    }
                }
                Poll::Ready(None) => {
                    this.state = SequenceState::Drained;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Incremental splitter extracting complete JSON values from a byte feed.
///
/// Accepts either newline-delimited JSON or one top-level JSON array whose
/// elements are emitted individually. A single bare value decodes as a
/// one-element sequence. Structural validation is left to `serde_json`; the
/// framer only finds value boundaries.
#[derive(Debug, Default)]
pub(crate) struct ValueFramer {
    buf: Vec<u8>,
    array_wrapped: Option<bool>,
    closed: bool,
}

impl ValueFramer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Discards buffered input so a fresh body can be framed from scratch.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Next complete value, or `None` when more input is needed (`at_end` =
    /// false) or the sequence is exhausted (`at_end` = true).
    pub(crate) fn next_value(&mut self, at_end: bool) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }

        let mut pos = 0;
        while pos < self.buf.len() {
            let byte = self.buf[pos];
            if byte.is_ascii_whitespace() || byte == b',' {
                pos += 1;
                continue;
            }
            if self.array_wrapped.is_none() {
                self.array_wrapped = Some(byte == b'[');
                if byte == b'[' {
                    pos += 1;
                    continue;
                }
            }
            if self.array_wrapped == Some(true) && byte == b']' {
                self.closed = true;
                self.buf.clear();
                return None;
            }
            break;
        }
        self.buf.drain(..pos);
        if self.buf.is_empty() {
            return None;
        }

        match scan_value(&self.buf) {
            Some(end) => Some(self.buf.drain(..end).collect()),
            // Truncated trailing value: hand it over whole so decoding
            // reports the mismatch instead of silently dropping bytes.
            None if at_end => Some(std::mem::take(&mut self.buf)),
            None => None,
        }
    }
}

/// Byte length of the first complete JSON value in `input`, if one has fully
/// arrived. Tracks nesting depth and string/escape state only.
fn scan_value(input: &[u8]) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    let composite = matches!(input[0], b'{' | b'[' | b'"');

    for (index, &byte) in input.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                if !composite && depth == 0 {
                    // Scalar terminated by the enclosing array's bracket.
                    return Some(index);
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(index + 1);
                }
            }
            b',' if depth == 0 => return Some(index),
            byte if byte.is_ascii_whitespace() && depth == 0 && !composite => {
                return Some(index);
            }
            _ => {}
        }
    }

    None
}
