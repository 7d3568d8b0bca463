//! Network tier of the content cache.

use std::io::{BufReader, BufWriter, Cursor, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::content::{BufferedWriter, CacheAccess, CacheKey, CacheWriter, ContentCache};
use crate::error::CacheError;
use crate::protocol::{read_frame, write_frame, Request, Response};

/// Client for a [`CacheServer`](crate::CacheServer).
///
/// Each request opens a short-lived connection bounded by the configured
/// timeout, so a dead server costs at most one timeout per lookup.
#[derive(Clone)]
pub struct RemoteCache {
    address: String,
    access: CacheAccess,
    timeout: Duration,
}

impl RemoteCache {
    /// Creates a client for the server at `address` (`host:port`).
    pub fn new(address: impl Into<String>, access: CacheAccess, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            access,
            timeout,
        }
    }

    /// Returns the configured server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Checks that the server answers.
    pub fn ping(&self) -> Result<(), CacheError> {
        match self.round_trip(&Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(self.unexpected(&other)),
        }
    }

    fn transport(&self, reason: impl std::fmt::Display) -> CacheError {
        CacheError::Transport {
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }

    fn unexpected(&self, response: &Response) -> CacheError {
        CacheError::Protocol {
            reason: format!("unexpected response from {}: {response:?}", self.address),
        }
    }

    fn connect(&self) -> Result<TcpStream, CacheError> {
        let addrs: Vec<SocketAddr> = self
            .address
            .to_socket_addrs()
            .map_err(|e| self.transport(e))?
            .collect();
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.timeout))
                        .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
                        .map_err(|e| self.transport(e))?;
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => self.transport(e),
            None => self.transport("address resolved to nothing"),
        })
    }

    fn round_trip(&self, request: &Request) -> Result<Response, CacheError> {
        let stream = self.connect()?;
        let mut writer = BufWriter::new(&stream);
        write_frame(&mut writer, request)?;
        drop(writer);
        let mut reader = BufReader::new(&stream);
        read_frame(&mut reader)?.ok_or_else(|| self.transport("connection closed before response"))
    }
}

impl ContentCache for RemoteCache {
    fn name(&self) -> &str {
        &self.address
    }

    fn access(&self) -> CacheAccess {
        self.access
    }

    fn get(&self, key: &CacheKey) -> Result<Option<Box<dyn Read + Send>>, CacheError> {
        if !self.access.read {
            return Ok(None);
        }
        match self.round_trip(&Request::Get { key: *key })? {
            Response::Hit { data } => Ok(Some(Box::new(Cursor::new(data)))),
            Response::Miss => Ok(None),
            Response::Rejected { reason } => Err(self.transport(reason)),
            other => Err(self.unexpected(&other)),
        }
    }

    fn put(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, CacheError> {
        if !self.access.write {
            return Err(CacheError::Unavailable {
                cache: self.address.clone(),
                reason: "write access disabled".to_string(),
            });
        }
        let client = self.clone();
        let key = *key;
        Ok(Box::new(BufferedWriter::new(move |data: Vec<u8>| {
            match client.round_trip(&Request::Put { key, data })? {
                Response::Stored => Ok(()),
                Response::Rejected { reason } => Err(client.transport(reason)),
                other => Err(client.unexpected(&other)),
            }
        })))
    }
}
