use std::time::Duration;

use lynx_http::connection::{ConnectionHandle, SecureConnection};
use lynx_http::handler::{make_handler, BoxError};
use lynx_http::protocol::{Request, Response};
use lynx_http::server::Server;
use lynx_http::tls::TlsConnector;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    // optional: `server https://example.com` fetches a page over TLS before serving
    if let Some(host) = std::env::args().nth(1).and_then(|url| url.strip_prefix("https://").map(str::to_owned)) {
        fetch(&host).await;
    }

    let server = match Server::builder().address("127.0.0.1:8080").handler(make_handler(hello_world)).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "invalid server configuration");
            return;
        }
    };

    if let Err(e) = server.start().await {
        error!(cause = %e, "server stopped");
    }
}

fn hello_world(request: Request, conn: &ConnectionHandle) -> Result<(), BoxError> {
    let path = request.uri().path();
    let agent = request.headers().get("User-Agent");
    info!(path, agent = ?agent, body_len = request.body().len(), "receiving request");

    let response = Response::ok()
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_header("Server", "lynx")
        .with_body("Hello World!\r\n");
    conn.send(&response.to_bytes()?)?;
    Ok(())
}

async fn fetch(host: &str) {
    let connector = match TlsConnector::builder()
        .with_webpki_roots()
        .alpn_protocols(["http/1.1"])
        .handshake_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(connector) => connector,
        Err(e) => {
            warn!(cause = %e, "tls is not available");
            return;
        }
    };

    let on_read = |bytes: &[u8], _conn: &ConnectionHandle| {
        info!(bytes = bytes.len(), "{}", String::from_utf8_lossy(bytes).lines().next().unwrap_or_default());
    };
    let mut connection = match SecureConnection::new(host, 443, &connector, on_read) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(cause = %e, "can't create tls connection");
            return;
        }
    };

    if let Err(e) = connection.connect().await {
        warn!(cause = %e, "tls connect failed");
        return;
    }

    let request = format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    match connection.send(request.as_bytes()) {
        Ok(()) => connection.closed().await,
        Err(e) => warn!(cause = %e, "send failed"),
    }
}
