//! TCP server exposing any [`ContentCache`] to [`RemoteCache`](crate::RemoteCache) clients.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::content::{read_entry, write_entry, ContentCache};
use crate::error::CacheError;
use crate::protocol::{read_frame, write_frame, Request, Response};

/// Idle time after which a client connection is dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connections served at once unless [`CacheServer::with_workers`] says otherwise.
pub const DEFAULT_SERVER_WORKERS: usize = 16;

/// A shared cache service backed by another cache tier.
pub struct CacheServer {
    listener: TcpListener,
    backing: Arc<dyn ContentCache>,
    shutdown: Arc<AtomicBool>,
    workers: usize,
}

impl CacheServer {
    /// Binds the server. Use port `0` to pick a free port.
    pub fn bind(
        addr: impl ToSocketAddrs,
        backing: Arc<dyn ContentCache>,
    ) -> Result<Self, CacheError> {
        let listener = TcpListener::bind(addr).map_err(|e| CacheError::Transport {
            address: "bind".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            listener,
            backing,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: DEFAULT_SERVER_WORKERS,
        })
    }

    /// Sets how many connections are served concurrently. Further
    /// connections queue until a worker frees up. `0` means one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, CacheError> {
        self.listener.local_addr().map_err(|e| CacheError::Transport {
            address: "bind".to_string(),
            reason: e.to_string(),
        })
    }

    /// Accepts connections until shut down and hands each one to a fixed
    /// pool of workers.
    pub fn serve(self) -> Result<(), CacheError> {
        let addr = self.local_addr()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("anvil-cache-conn-{i}"))
            .panic_handler(|_| tracing::error!("cache connection handler panicked"))
            .build()
            .map_err(|e| CacheError::Transport {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            %addr,
            backing = self.backing.name(),
            workers = self.workers,
            "cache server listening"
        );
        for stream in self.listener.incoming() {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    let backing = Arc::clone(&self.backing);
                    pool.spawn(move || {
                        let peer = stream.peer_addr().ok();
                        if let Err(e) = handle_connection(stream, backing.as_ref()) {
                            tracing::warn!(?peer, error = %e, "cache connection failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cache server accept failed");
                }
            }
        }
        tracing::info!(%addr, "cache server stopped");
        Ok(())
    }

    /// Runs [`serve`](Self::serve) on a background thread.
    pub fn spawn(self) -> Result<ServerHandle, CacheError> {
        let addr = self.local_addr()?;
        let shutdown = Arc::clone(&self.shutdown);
        let thread = std::thread::Builder::new()
            .name("anvil-cache-server".to_string())
            .spawn(move || self.serve())
            .map_err(|e| CacheError::Transport {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// Handle to a server started with [`CacheServer::spawn`].
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), CacheError>>>,
}

impl ServerHandle {
    /// The address clients connect to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for the accept loop to exit.
    pub fn shutdown(mut self) -> Result<(), CacheError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), CacheError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::Release);
        // Wake the blocking accept.
        let _ = TcpStream::connect_timeout(&self.addr, Duration::from_secs(1));
        thread.join().map_err(|_| CacheError::Transport {
            address: self.addr.to_string(),
            reason: "server thread panicked".to_string(),
        })?
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn handle_connection(stream: TcpStream, backing: &dyn ContentCache) -> Result<(), CacheError> {
    stream
        .set_read_timeout(Some(IDLE_TIMEOUT))
        .map_err(|e| CacheError::Protocol {
            reason: e.to_string(),
        })?;
    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);

    while let Some(request) = read_frame::<Request>(&mut reader)? {
        let response = match request {
            Request::Ping => Response::Pong,
            Request::Get { key } => match read_entry(backing, &key) {
                Ok(Some(data)) => Response::Hit { data },
                Ok(None) => Response::Miss,
                Err(e) => {
                    tracing::debug!(
                        identity = %key.identity,
                        error = %e,
                        "served miss for unreadable entry"
                    );
                    Response::Miss
                }
            },
            Request::Put { key, data } => match write_entry(backing, &key, &data) {
                Ok(()) => Response::Stored,
                Err(e) => Response::Rejected {
                    reason: e.to_string(),
                },
            },
        };
        write_frame(&mut writer, &response)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CacheAccess, CacheKey};
    use crate::local::LocalCache;
    use crate::remote::RemoteCache;
    use anvil_common::{FingerprintBuilder, Identity};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(
            Identity::from_name(name),
            FingerprintBuilder::new(name).finish(),
            1,
        )
    }

    fn start(access: CacheAccess) -> (tempfile::TempDir, ServerHandle) {
        start_with_workers(access, DEFAULT_SERVER_WORKERS)
    }

    fn start_with_workers(
        access: CacheAccess,
        workers: usize,
    ) -> (tempfile::TempDir, ServerHandle) {
        let dir = tempfile::tempdir().unwrap();
        let backing = Arc::new(LocalCache::new(dir.path(), access));
        let server = CacheServer::bind("127.0.0.1:0", backing).unwrap();
        (dir, server.with_workers(workers).spawn().unwrap())
    }

    fn client(handle: &ServerHandle, access: CacheAccess) -> RemoteCache {
        RemoteCache::new(handle.addr().to_string(), access, Duration::from_secs(5))
    }

    #[test]
    fn ping() {
        let (_dir, handle) = start(CacheAccess::READ_WRITE);
        client(&handle, CacheAccess::READ_ONLY).ping().unwrap();
        handle.shutdown().unwrap();
    }

    #[test]
    fn put_then_get_over_the_network() {
        let (_dir, handle) = start(CacheAccess::READ_WRITE);
        let remote = client(&handle, CacheAccess::READ_WRITE);

        assert!(read_entry(&remote, &key("tex")).unwrap().is_none());
        write_entry(&remote, &key("tex"), b"texels").unwrap();
        assert_eq!(
            read_entry(&remote, &key("tex")).unwrap().as_deref(),
            Some(&b"texels"[..])
        );
    }

    #[test]
    fn read_only_backing_rejects_puts() {
        let (_dir, handle) = start(CacheAccess::READ_ONLY);
        let remote = client(&handle, CacheAccess::READ_WRITE);
        let err = write_entry(&remote, &key("tex"), b"texels").unwrap_err();
        assert!(err.to_string().contains("write access disabled"));
    }

    #[test]
    fn connections_beyond_the_worker_limit_wait_for_a_free_worker() {
        let (_dir, handle) = start_with_workers(CacheAccess::READ_WRITE, 1);
        // Occupies the only worker until it hangs up.
        let idle = TcpStream::connect(handle.addr()).unwrap();
        let impatient = RemoteCache::new(
            handle.addr().to_string(),
            CacheAccess::READ_ONLY,
            Duration::from_millis(300),
        );
        assert!(impatient.ping().is_err());

        drop(idle);
        client(&handle, CacheAccess::READ_ONLY).ping().unwrap();
        handle.shutdown().unwrap();
    }

    #[test]
    fn server_shutdown_makes_client_fail() {
        let (_dir, handle) = start(CacheAccess::READ_WRITE);
        let remote = RemoteCache::new(
            handle.addr().to_string(),
            CacheAccess::READ_ONLY,
            Duration::from_millis(300),
        );
        handle.shutdown().unwrap();
        assert!(remote.ping().is_err());
    }
}
