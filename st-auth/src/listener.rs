//! Local OAuth redirect listener using hyper 1.x.
//!
//! Listens on `127.0.0.1:<port>` and serves a single path. Two redirect
//! shapes are accepted:
//! - `GET <path>?access_token=...&state=...` -- parameters in the query string
//! - `GET <path>#access_token=...` -- the implicit grant puts them in the URL
//!   fragment, which browsers never send. The listener answers with a page
//!   whose script re-requests the same path with the fragment as the query.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use st_core::error::{StError, StResult};

/// Receives the decoded redirect parameters. Called once per captured redirect.
pub type CallbackHandler = Arc<dyn Fn(HashMap<String, String>) + Send + Sync>;

const DONE_PAGE: &str = "<html><body>&#x2705; You can close this window.</body></html>";

const RELAY_PAGE: &str = r#"<html>
<head><title>OAuth Callback</title></head>
<body>
    <h1>Processing...</h1>
    <script>
        const fragment = window.location.hash.substring(1);
        if (fragment) {
            const params = new URLSearchParams(fragment);
            window.location.href = window.location.pathname + '?' + params.toString();
        } else {
            document.body.innerHTML = '<h1>&#x274C; Authentication failed</h1>';
        }
    </script>
</body>
</html>
"#;

struct ListenerContext {
    path: String,
    handler: CallbackHandler,
}

/// A bound redirect listener. Dropping it stops the server.
pub struct CallbackListener {
    local_addr: SocketAddr,
    path: String,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl CallbackListener {
    /// Bind the listener and start serving. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16, path: &str, handler: CallbackHandler) -> StResult<Self> {
        if !path.starts_with('/') {
            return Err(StError::InvalidArgument(format!(
                "callback path must start with '/': {path}"
            )));
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StError::Http(format!("failed to bind callback listener on {addr}: {e}")))?;
        let local_addr = listener.local_addr()?;
        info!("callback listener on http://{local_addr}{path}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(ListenerContext {
            path: path.to_string(),
            handler,
        });
        tokio::spawn(serve(listener, ctx, shutdown_rx));

        Ok(Self {
            local_addr,
            path: path.to_string(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The redirect URI to register with the provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.local_addr.port(), self.path)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting connections. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        info!("callback listener on {} stopped", self.local_addr);
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.close();
    }
}

async fn serve(
    listener: TcpListener,
    ctx: Arc<ListenerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote)) => {
                        let ctx = ctx.clone();
                        debug!("callback connection from {remote}");
                        tokio::spawn(async move {
                            let svc = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(hyper_util::rt::TokioIo::new(stream), svc)
                                .await
                            {
                                debug!("callback connection error: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("callback accept error: {e}"),
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<ListenerContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != ctx.path {
        return Ok(text_response(StatusCode::NOT_FOUND, "text/plain", "not found"));
    }

    let query = req.uri().query().unwrap_or("");
    if query.is_empty() {
        debug!("callback without query, relaying fragment");
        return Ok(text_response(StatusCode::OK, "text/html; charset=utf-8", RELAY_PAGE));
    }

    let params = parse_query(query);
    debug!(
        "callback captured with keys {:?}",
        params.keys().collect::<Vec<_>>()
    );
    (ctx.handler)(params);
    Ok(text_response(StatusCode::OK, "text/html; charset=utf-8", DONE_PAGE))
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

/// Decode an `application/x-www-form-urlencoded` query. Later keys win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    reqwest::Url::parse(&format!("http://localhost/?{query}"))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}
