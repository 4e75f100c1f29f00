//! Shared helpers for module unit tests.

use tokio::net::{TcpListener, TcpStream};

/// Returns a connected (server side, client side) loopback socket pair.
pub(crate) async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    (accepted, connect.await.unwrap())
}
