//! Memcached cache store.
//!
//! Speaks the memcached text protocol (`get`, `set`, `version`) over a
//! fresh TCP connection per operation, so concurrent polling tasks never
//! share a socket. Every operation is bounded by the configured timeout.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::trace;

use super::store::{CacheFuture, CacheStore};
use crate::errors::CacheError;

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

pub struct MemcachedStore {
    address: String,
    timeout: Duration,
}

impl MemcachedStore {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    fn io_error(&self, err: std::io::Error) -> CacheError {
        CacheError::Connection {
            address: self.address.clone(),
            detail: err.to_string(),
        }
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, CacheError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(BufStream::new(stream))
    }

    async fn send(&self, conn: &mut BufStream<TcpStream>, payload: &[u8]) -> Result<(), CacheError> {
        conn.write_all(payload).await.map_err(|e| self.io_error(e))?;
        conn.flush().await.map_err(|e| self.io_error(e))
    }

    async fn read_line(&self, conn: &mut BufStream<TcpStream>) -> Result<String, CacheError> {
        let mut line = String::new();
        let n = conn
            .read_line(&mut line)
            .await
            .map_err(|e| self.io_error(e))?;
        if n == 0 {
            return Err(CacheError::Protocol("connection closed by server".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connect().await?;
        self.send(&mut conn, format!("get {key}\r\n").as_bytes())
            .await?;

        let header = self.read_line(&mut conn).await?;
        if header == "END" {
            return Ok(None);
        }
        let len = match header.split(' ').collect::<Vec<_>>().as_slice() {
            ["VALUE", _key, _flags, len, ..] => len
                .parse::<usize>()
                .map_err(|_| CacheError::Protocol(header.clone()))?,
            _ => return Err(CacheError::Protocol(header)),
        };

        let mut data = vec![0u8; len + 2];
        conn.read_exact(&mut data)
            .await
            .map_err(|e| self.io_error(e))?;
        data.truncate(len);
        let value =
            String::from_utf8(data).map_err(|e| CacheError::Protocol(e.to_string()))?;

        let end = self.read_line(&mut conn).await?;
        if end != "END" {
            return Err(CacheError::Protocol(end));
        }
        Ok(Some(value))
    }

    async fn set_value(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connect().await?;
        let command = format!(
            "set {key} 0 {} {}\r\n{value}\r\n",
            ttl.as_secs(),
            value.len()
        );
        self.send(&mut conn, command.as_bytes()).await?;
        match self.read_line(&mut conn).await?.as_str() {
            "STORED" => Ok(()),
            other => Err(CacheError::Protocol(other.to_string())),
        }
    }

    async fn version(&self) -> Result<String, CacheError> {
        let mut conn = self.connect().await?;
        self.send(&mut conn, b"version\r\n").await?;
        let reply = self.read_line(&mut conn).await?;
        match reply.strip_prefix("VERSION ") {
            Some(version) => Ok(version.to_string()),
            None => Err(CacheError::Protocol(reply)),
        }
    }
}

impl CacheStore for MemcachedStore {
    fn get(&self, key: &str) -> CacheFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            self.bounded(self.get_value(&key)).await
        })
    }

    fn set(&self, key: &str, value: String, ttl: Duration) -> CacheFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            validate_key(&key)?;
            self.bounded(self.set_value(&key, &value, ttl)).await
        })
    }

    fn ping(&self) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            let version = self.bounded(self.version()).await?;
            trace!(address = %self.address, version = %version, "memcached reachable");
            Ok(())
        })
    }
}

/// Keys are at most 250 bytes with no whitespace or control characters.
fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// -- Tests --------------------------------------------------------------------
