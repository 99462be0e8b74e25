//! TCP socket setup.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::domain::config::ConnectionConfig;
use crate::domain::errors::TransportError;

/// Connects to `host:port`, trying each resolved address within the connect
/// budget, and applies the read timeout and socket options.
pub fn connect(host: &str, port: u16, config: &ConnectionConfig) -> Result<TcpStream, TransportError> {
    let addr = format!("{}:{}", host, port);
    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectFailed {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => {
                configure(&stream, config)?;
                tracing::debug!(addr = %candidate, "tcp connected");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(TransportError::ConnectFailed {
        addr,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "host resolved to no addresses".to_string()),
    })
}

fn configure(stream: &TcpStream, config: &ConnectionConfig) -> Result<(), TransportError> {
    stream.set_read_timeout(read_timeout(config.read_timeout))?;
    stream.set_nodelay(config.nodelay)?;
    Ok(())
}

/// `None` for a zero duration, which the socket API rejects.
pub fn read_timeout(timeout: Duration) -> Option<Duration> {
    Some(timeout).filter(|d| !d.is_zero())
}
