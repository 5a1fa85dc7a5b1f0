//! RPC client for calling a plugin

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::RpcError;
use crate::messages::{Request, Response};
use crate::plugin::Spi;
use crate::transport::{decode_frame, read_line, write_frame, Stream};
use crate::IMPLEMENTS_METHOD;

/// Client for one plugin endpoint
///
/// Every call dials a fresh connection, so a `Client` can be cloned and
/// used from any number of tasks without the calls sharing framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    endpoint: Endpoint,
    timeout: Option<Duration>,
}

impl Client {
    /// Create a client for an address string such as `unix:///path/x.sock`
    pub fn new(address: &str) -> Result<Self, RpcError> {
        Ok(Self::from_endpoint(Endpoint::parse(address)?))
    }

    pub fn from_endpoint(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: None,
        }
    }

    /// Bound every call (dial, send and receive) by a deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Call `method` with `params` and decode the result into `R`
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Call `method` and return the undecoded result
    pub async fn call_raw<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<serde_json::Value, RpcError> {
        let request = Request::new(method, params)?;
        trace!(method = %method, id = %request.id, endpoint = %self.endpoint, "Sending request");

        let start = Instant::now();
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.round_trip(&request))
                .await
                .map_err(|_| RpcError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })??,
            None => self.round_trip(&request).await?,
        };

        debug!(
            method = %method,
            endpoint = %self.endpoint,
            elapsed_ms = start.elapsed().as_micros() as f64 / 1000.0,
            ok = !response.is_error(),
            "RPC call"
        );

        if response.id != request.id {
            return Err(RpcError::IdMismatch {
                expected: request.id,
                actual: response.id,
            });
        }

        response.into_result()
    }

    /// Check the endpoint accepts connections, without sending a request
    pub async fn probe(&self) -> Result<(), RpcError> {
        let dial = Stream::connect(&self.endpoint);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, dial)
                .await
                .map_err(|_| RpcError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })?
                .map(drop),
            None => dial.await.map(drop),
        }
    }

    /// Ask the plugin which interfaces it implements
    pub async fn implements(&self) -> Result<Vec<Spi>, RpcError> {
        self.call(IMPLEMENTS_METHOD, ()).await
    }

    async fn round_trip(&self, request: &Request) -> Result<Response, RpcError> {
        match Stream::connect(&self.endpoint).await? {
            Stream::Unix(stream) => exchange(stream, request, &self.endpoint).await,
            Stream::Tcp(stream) => exchange(stream, request, &self.endpoint).await,
        }
    }
}

async fn exchange<S>(stream: S, request: &Request, endpoint: &Endpoint) -> Result<Response, RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    write_frame(&mut writer, request).await?;

    let mut line = String::new();
    if read_line(&mut reader, &mut line).await?.is_none() {
        return Err(RpcError::ConnectionClosed(endpoint.clone()));
    }
    decode_frame(&line)
}
