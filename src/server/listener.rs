//! Signaling gateway listener
//!
//! Serves the viewer assets and upgrades `/ws` to the signaling WebSocket.
//! New upgrades beyond the session cap are refused before any session is
//! created. With auth enabled every route sits behind an HTTP Digest
//! challenge, so an unauthenticated upgrade never reaches a session.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::auth::{CredentialStore, Denied, DigestAuth, MemoryCredentialStore};
use crate::error::Result;
use crate::server::assets::{serve_asset, LANDING_PAGE};
use crate::server::connection::handle_socket;
use crate::server::context::ServerContext;

/// WebRTC camera relay server
pub struct RelayServer {
    ctx: Arc<ServerContext>,
    session_semaphore: Option<Arc<Semaphore>>,
    auth: Option<Arc<DigestAuth>>,
}

#[derive(Clone)]
struct AppState {
    ctx: Arc<ServerContext>,
    session_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Server whose accounts are the ones listed in the config
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let auth = &ctx.config.auth;
        let store = MemoryCredentialStore::with_users(&auth.realm, &auth.users);
        Self::with_credentials(ctx, Arc::new(store))
    }

    /// Server checking accounts against `store`
    pub fn with_credentials(ctx: Arc<ServerContext>, store: Arc<dyn CredentialStore>) -> Self {
        let auth = ctx
            .config
            .auth
            .enabled
            .then(|| Arc::new(DigestAuth::new(ctx.config.auth.realm.clone(), store)));

        let session_semaphore = if ctx.config.max_sessions > 0 {
            Some(Arc::new(Semaphore::new(ctx.config.max_sessions)))
        } else {
            None
        };

        Self {
            ctx,
            session_semaphore,
            auth,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.ctx.config.bind_addr
    }

    /// Reserve a session slot
    ///
    /// `None` when the cap is reached; `Some(None)` when there is no cap.
    pub fn try_admit(&self) -> Option<Option<OwnedSemaphorePermit>> {
        try_admit(self.session_semaphore.as_ref())
    }

    /// HTTP routes
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: Arc::clone(&self.ctx),
            session_semaphore: self.session_semaphore.clone(),
        };

        let router = Router::new()
            .route("/", get(|| async { Redirect::temporary(LANDING_PAGE) }))
            // WebSocket upgrades are GET requests; anything else is a 405
            .route("/ws", get(ws_handler))
            .route("/:asset", get(asset_handler))
            .with_state(state);

        match &self.auth {
            Some(auth) => {
                router.layer(middleware::from_fn_with_state(Arc::clone(auth), require_digest))
            }
            None => router,
        }
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.ctx.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            max_sessions = self.ctx.config.max_sessions,
            auth = self.auth.is_some(),
            "Camera relay listening"
        );

        let stats_handle = self.spawn_stats_task();

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        stats_handle.abort();
        self.ctx.shutdown().await;

        result.map_err(Into::into)
    }

    fn spawn_stats_task(&self) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let period = ctx.config.stats_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                let stats = ctx.stats().await;
                tracing::info!(
                    sessions = stats.active_sessions,
                    total = stats.total_sessions,
                    recording = stats.recording,
                    frames_in = stats.bus.frames_in,
                    dropped = stats.bus.dropped,
                    drop_ratio = stats.bus.drop_ratio(),
                    jobs = stats.jobs_completed,
                    uptime_secs = stats.uptime.as_secs(),
                    "Relay stats"
                );
            }
        })
    }
}

fn try_admit(semaphore: Option<&Arc<Semaphore>>) -> Option<Option<OwnedSemaphorePermit>> {
    match semaphore {
        Some(sem) => Arc::clone(sem).try_acquire_owned().ok().map(Some),
        None => Some(None),
    }
}

async fn require_digest(
    State(auth): State<Arc<DigestAuth>>,
    req: Request,
    next: Next,
) -> Response {
    let outcome = {
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        auth.verify(req.method().as_str(), uri, authorization)
    };

    match outcome {
        Ok(user) => {
            tracing::debug!(user = %user, path = %req.uri().path(), "Request authenticated");
            next.run(req).await
        }
        Err(denied) => {
            if denied != Denied::Missing {
                tracing::warn!(reason = %denied, path = %req.uri().path(), "Authentication failed");
            }
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, auth.challenge(denied.is_stale()))],
                "authentication required",
            )
                .into_response()
        }
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(permit) = try_admit(state.session_semaphore.as_ref()) else {
        tracing::warn!("Signaling upgrade rejected: session limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many sessions").into_response();
    };

    match upgrade {
        Ok(ws) => {
            let ctx = state.ctx;
            ws.on_upgrade(move |socket| handle_socket(socket, ctx, permit))
        }
        Err(rejection) => rejection.into_response(),
    }
}

async fn asset_handler(State(state): State<AppState>, Path(asset): Path<String>) -> Response {
    serve_asset(&state.ctx.config.web_root, &asset).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::digest::tests::authorization;
    use crate::auth::{Credential, DEFAULT_REALM};
    use crate::engine::{LoopbackEngine, VirtualDevice};
    use crate::presence::MemoryAccessLog;
    use crate::server::config::{AuthConfig, ServerConfig};
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use tower::ServiceExt;

    fn server(config: ServerConfig) -> RelayServer {
        RelayServer::new(context(config))
    }

    fn context(config: ServerConfig) -> Arc<ServerContext> {
        ServerContext::new(
            config,
            Arc::new(LoopbackEngine::new()),
            Arc::new(VirtualDevice::new()),
            Arc::new(MemoryAccessLog::new()),
        )
    }

    fn with_authorization(uri: &str, value: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, value)
            .body(Body::empty())
            .unwrap()
    }

    fn challenge_of(response: &Response) -> String {
        response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_redirects() {
        let server = server(ServerConfig::default());
        let response = server
            .router()
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), LANDING_PAGE);
    }

    #[tokio::test]
    async fn test_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("webrtc.html"), "<html></html>").unwrap();
        let server = server(ServerConfig::default().web_root(dir.path()));

        let response = server
            .router()
            .oneshot(request(Method::GET, "/webrtc.html"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<html></html>");

        let missing = server
            .router()
            .oneshot(request(Method::GET, "/config.json"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let posted = server
            .router()
            .oneshot(request(Method::POST, "/webrtc.html"))
            .await
            .unwrap();
        assert_eq!(posted.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_session_cap_rejects_upgrade() {
        let server = server(ServerConfig::default().max_sessions(1));

        let held = server.try_admit().unwrap();
        assert!(held.is_some());
        assert!(server.try_admit().is_none());

        let response = server
            .router()
            .oneshot(request(Method::GET, "/ws"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(server.context().registry.is_empty().await);

        drop(held);
        assert!(server.try_admit().is_some());
    }

    #[tokio::test]
    async fn test_unlimited_sessions() {
        let server = server(ServerConfig::default().max_sessions(0));
        assert!(matches!(server.try_admit(), Some(None)));
    }

    #[tokio::test]
    async fn test_plain_get_is_not_upgraded() {
        let server = server(ServerConfig::default());
        let response = server
            .router()
            .oneshot(request(Method::GET, "/ws"))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert!(server.context().registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_upgrade_is_get_only() {
        let server = server(ServerConfig::default());
        let response = server
            .router()
            .oneshot(request(Method::POST, "/ws"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(server.context().registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_upgrade_requires_credentials() {
        let config =
            ServerConfig::default().auth(AuthConfig::required().user("test", "test1234"));
        let server = server(config);

        let response = server
            .router()
            .oneshot(request(Method::GET, "/ws"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = challenge_of(&response);
        assert!(challenge.starts_with(&format!("Digest realm=\"{}\"", DEFAULT_REALM)));
        assert!(server.context().registry.is_empty().await);

        let wrong = authorization(&challenge, "test", "guess", "GET", "/ws");
        let response = server
            .router()
            .oneshot(with_authorization("/ws", &wrong))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Past auth the plain GET fails as a WebSocket upgrade instead
        let good = authorization(&challenge, "test", "test1234", "GET", "/ws");
        let response = server
            .router()
            .oneshot(with_authorization("/ws", &good))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.status().is_client_error());
        assert!(server.context().registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_assets_behind_auth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.js"), "//").unwrap();
        let config = ServerConfig::default()
            .web_root(dir.path())
            .auth(AuthConfig::required());
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert(DEFAULT_REALM, Credential::new("cam", "secret"));
        let server = RelayServer::with_credentials(context(config), store.clone());

        let denied = server
            .router()
            .oneshot(request(Method::GET, "/main.js"))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let header = authorization(&challenge_of(&denied), "cam", "secret", "GET", "/main.js");
        let response = server
            .router()
            .oneshot(with_authorization("/main.js", &header))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Accounts removed from the store stop working at once
        store.remove("cam", DEFAULT_REALM);
        let response = server
            .router()
            .oneshot(with_authorization("/main.js", &header))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_disabled_by_default() {
        let server = server(ServerConfig::default());
        let response = server
            .router()
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }
}
