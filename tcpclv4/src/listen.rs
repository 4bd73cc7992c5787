//! The passive side: a reusable listener socket and its accept loop.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket};

/// Binds a listener with `SO_REUSEADDR`, so restarts and test harnesses
/// can take the port back immediately.
pub fn bind_listener(bind: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rebind_after_drop() {
        let listener = bind_listener("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        bind_listener("127.0.0.1", port).unwrap();
    }
}
