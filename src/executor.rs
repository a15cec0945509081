use bytes::Bytes;
use http::{Method, StatusCode};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::body::{build_http_request, read_all_body};
use crate::error::{GatewayError, TransportErrorKind};
use crate::util::{classify_transport_error, parse_uri, truncate_body};

/// Translates one request description into a live HTTP exchange: fresh client
/// per call, `Accept: application/json`, no retry or timeout logic. Policy is
/// layered on by the gateway pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RequestExecutor;

impl RequestExecutor {
    /// Runs one exchange up to status classification: a 4xx or 5xx reads the
    /// body for diagnostics and fails, anything else hands back the still
    /// unconsumed body stream.
    pub(crate) async fn open_exchange(
        self,
        url: &str,
        body: Option<Bytes>,
        method: Method,
    ) -> Result<Incoming, GatewayError> {
        let exchange = self.issue(url, body, method.clone()).await?;
        let status = exchange.status();

        if status.is_client_error() || status.is_server_error() {
            let raw = read_all_body(exchange.into_body()).await?;
            return Err(GatewayError::HttpStatus {
                status: status.as_u16(),
                method,
                uri: url.to_owned(),
                body: truncate_body(&raw),
            });
        }

        Ok(exchange.into_body())
    }

    /// Begins the exchange. Nothing runs until the returned future is
    /// awaited, so issuing never fails synchronously; transport failures
    /// surface when the pending exchange is consumed.
    async fn issue(
        &self,
        url: &str,
        body: Option<Bytes>,
        method: Method,
    ) -> Result<Exchange, GatewayError> {
        let uri = parse_uri(url)?;
        let https = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|source| GatewayError::Transport {
                kind: TransportErrorKind::Tls,
                method: method.clone(),
                uri: url.to_owned(),
                source: Box::new(source),
            })?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        let request = build_http_request(method.clone(), uri, body)?;
        let response = client
            .request(request)
            .await
            .map_err(|source| GatewayError::Transport {
                kind: classify_transport_error(&source),
                method,
                uri: url.to_owned(),
                source: Box::new(source),
            })?;

        let (parts, body) = response.into_parts();
        Ok(Exchange {
            status: parts.status,
            body,
        })
    }
}

/// Resolved head of an exchange: the status line has arrived, the body is
/// still an unconsumed stream.
#[derive(Debug)]
struct Exchange {
    status: StatusCode,
    body: Incoming,
}

impl Exchange {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn into_body(self) -> Incoming {
        self.body
    }
}
