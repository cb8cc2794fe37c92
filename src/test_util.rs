use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serves `app` on an ephemeral local port for the rest of the test.
pub(crate) async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
