//! Newline-delimited JSON framing shared by client and server

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::endpoint::{Endpoint, Scheme};
use crate::error::RpcError;

/// A dialed connection of either scheme
pub(crate) enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub(crate) async fn connect(endpoint: &Endpoint) -> Result<Self, RpcError> {
        let result = match endpoint.scheme() {
            Scheme::Unix => UnixStream::connect(endpoint.address()).await.map(Stream::Unix),
            Scheme::Tcp => TcpStream::connect(endpoint.address()).await.map(Stream::Tcp),
        };
        result.map_err(|source| RpcError::Connect {
            endpoint: endpoint.clone(),
            source,
        })
    }
}

/// Write one value as a single line and flush
pub(crate) async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value).map_err(|e| RpcError::Encode(e.to_string()))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line. Returns `None` on a clean end of stream.
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut String) -> Result<Option<()>, RpcError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader.read_line(buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(()))
}

/// Decode one line read by [`read_line`]
pub(crate) fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, RpcError> {
    serde_json::from_str(line.trim()).map_err(|e| RpcError::Decode(e.to_string()))
}
