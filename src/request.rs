use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::GatewayResult;
use crate::error::GatewayError;

/// Immutable description of one outbound HTTP exchange: url, method, and an
/// optional pre-serialized JSON body. Built once per call and discarded after
/// the call completes; the buffered body keeps the descriptor replayable
/// across retry attempts.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Serializes `payload` as the JSON request body. Serialization happens
    /// here, not at send time, so the descriptor stays immutable afterwards.
    pub fn json<T>(mut self, payload: &T) -> GatewayResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let body =
            serde_json::to_vec(payload).map_err(|source| GatewayError::Serialize { source })?;
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}
