use anyhow::{Result, bail};
use axum::{
    Router,
    extract::{Request, State},
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::Uri,
    middleware::map_request_with_state,
    response::IntoResponse,
    routing::get,
};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

mod connections;

pub use connections::{ConnectionSet, ConnectionTx};

/// Websocket endpoint the injected script connects to.
pub const RELOAD_PATH: &str = "/__livereload";
/// Sent to every open socket after the output tree changes.
pub const RELOAD_MESSAGE: &str = "reload";
/// Sent once when a socket connects.
pub const GREETING: &str = "connected";

const DEBOUNCE: Duration = Duration::from_millis(300);

/// Configuration for the live development server
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to serve on
    pub port: u16,
    /// Output directory to serve and watch
    pub root: PathBuf,
    /// Auto-open browser
    pub open: bool,
    /// Accept live-reload sockets and watch `root` for changes
    pub live_reload: bool,
    /// Path components to ignore when watching
    pub ignore: Vec<String>,
}

impl Default for LiveServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            root: PathBuf::from("_site"),
            open: false,
            live_reload: true,
            ignore: vec![],
        }
    }
}

/// A static file server over the output tree, with optional live reload.
pub struct LiveServer {
    config: LiveServerConfig,
    connections: ConnectionSet,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig) -> Self {
        Self {
            config,
            connections: ConnectionSet::new(),
        }
    }

    /// Handle to the server's sockets, for broadcasting from outside.
    pub fn connections(&self) -> ConnectionSet {
        self.connections.clone()
    }

    pub async fn run(self) -> Result<()> {
        let root = self.config.root.clone();
        if !root.is_dir() {
            bail!("Output directory does not exist: {}", root.display());
        }

        let connections = self.config.live_reload.then(|| self.connections.clone());
        if let Some(connections) = connections.clone() {
            let watch_root = root.clone();
            let ignore = self.config.ignore.clone();
            tokio::spawn(async move {
                if let Err(e) = watch_output(watch_root, connections, ignore).await {
                    error!(error = %e, "output watcher stopped");
                }
            });
        }

        let app = router(&root, connections);

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{addr}");

        info!(%url, root = %root.display(), live_reload = self.config.live_reload, "serving site");

        if self.config.open {
            if let Err(e) = open::that(&url) {
                warn!(error = %e, "failed to open browser");
            }
        }

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Routes for the dev server: the output tree through [`ServeDir`] (which
/// maps directories to `index.html`, infers content types and answers 404),
/// plus the websocket endpoint when `connections` is given. Extensionless
/// paths with a `.html` sibling are served from it, so cool-URL output
/// (`/blog/1.html`) answers at `/blog/1`.
pub fn router(root: &Path, connections: Option<ConnectionSet>) -> Router {
    let files = ServeDir::new(root);

    let app = match connections {
        Some(connections) => Router::new()
            .route(RELOAD_PATH, get(websocket_handler))
            .fallback_service(files)
            .with_state(connections),
        None => Router::new().fallback_service(files),
    };

    app.layer(map_request_with_state(root.to_path_buf(), cool_url))
}

async fn cool_url(State(root): State<PathBuf>, mut request: Request) -> Request {
    if let Some(path) = html_sibling(&root, request.uri().path()) {
        let rewritten = match request.uri().query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        if let Ok(uri) = rewritten.parse::<Uri>() {
            *request.uri_mut() = uri;
        }
    }
    request
}

/// `/blog/1` → `/blog/1.html` when that file exists under `root` and the
/// path itself does not.
fn html_sibling(root: &Path, path: &str) -> Option<String> {
    let relative = path.trim_start_matches('/');
    let name = relative.rsplit('/').next()?;
    if name.is_empty() || name.contains('.') || relative.split('/').any(|c| c == "..") {
        return None;
    }
    if root.join(relative).exists() {
        return None;
    }
    root.join(format!("{relative}.html"))
        .is_file()
        .then(|| format!("/{relative}.html"))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(connections): State<ConnectionSet>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, connections))
}

async fn websocket_connection(mut socket: WebSocket, connections: ConnectionSet) {
    // Send initial connection confirmation
    if socket.send(Message::Text(GREETING.to_string().into())).await.is_err() {
        return;
    }

    let (id, mut rx) = connections.register();
    debug!(id, open = connections.len(), "live-reload client connected");

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    connections.unregister(id);
    debug!(id, "live-reload client disconnected");
}

/// Broadcast [`RELOAD_MESSAGE`] once per debounced batch of changes under
/// `root`.
async fn watch_output(root: PathBuf, connections: ConnectionSet, ignore: Vec<String>) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let changed: Vec<PathBuf> = events
                .into_iter()
                .map(|event| event.path)
                .filter(|path| !is_ignored(path, &ignore))
                .collect();
            if !changed.is_empty() {
                let _ = tx.blocking_send(changed);
            }
        }
        Err(e) => warn!(error = ?e, "watch error"),
    })?;

    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)?;

    debug!(root = %root.display(), "watching output");

    while let Some(changed) = rx.recv().await {
        let sent = connections.broadcast(RELOAD_MESSAGE);
        info!(changed = changed.len(), clients = sent, "output changed, reloading");
    }

    Ok(())
}

/// Whether any component of `path` is one of the ignore patterns.
pub fn is_ignored(path: &Path, ignore: &[String]) -> bool {
    path.components()
        .any(|c| ignore.iter().any(|pattern| c.as_os_str() == pattern.as_str()))
}

/// Client script injected into served pages. It reloads the page on
/// [`RELOAD_MESSAGE`] and connects back to whatever host served it.
pub fn livereload_script() -> String {
    format!(
        r#"
<script>
(function() {{
    const scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    const socket = new WebSocket(scheme + location.host + '{RELOAD_PATH}');
    socket.onmessage = function(event) {{
        if (event.data === '{RELOAD_MESSAGE}') {{
            location.reload();
        }}
    }};
    socket.onclose = function() {{
        console.log('Live reload disconnected');
    }};
}})();
</script>
"#
    )
}
