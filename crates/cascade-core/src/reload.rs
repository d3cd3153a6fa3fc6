//! Live-reload protocol shared by the dev server and the pipeline.
//!
//! Listeners connect over a WebSocket and receive [`ReloadMessage`]s as JSON.
//! A stylesheet change is pushed as `css-update` (the client swaps the
//! `<link>` without reloading); an HTML change as a full `reload`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use cascade_util::path::{relative_to, to_slash};

use crate::pipeline::BuildEvent;

/// WebSocket endpoint.
pub const SOCKET_PATH: &str = "/__cascade";
/// Client script endpoint.
pub const CLIENT_PATH: &str = "/@cascade-client";

const CHANNEL_CAPACITY: usize = 16;

/// Message sent to reload listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReloadMessage {
    /// Sent once when a listener connects.
    Connected,
    /// Full page reload.
    Reload,
    /// Replace the stylesheet at `path` (URL path under the server root).
    CssUpdate { path: String, timestamp: u64 },
    /// Build error, shown in the browser console.
    Error { message: String },
}

impl ReloadMessage {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"reload"}"#.to_string())
    }
}

/// Fan-out of reload messages to every connected listener.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    tx: broadcast::Sender<ReloadMessage>,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadHub {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send to all listeners. Returns how many received it (0 is fine).
    pub fn notify(&self, message: ReloadMessage) -> usize {
        match self.tx.send(message) {
            Ok(count) => count,
            Err(broadcast::error::SendError(message)) => {
                trace!(?message, "No reload listeners");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Translate pipeline events into reload messages until the pipeline goes away.
    pub async fn forward(self, mut events: broadcast::Receiver<BuildEvent>, root: PathBuf) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let message = message_for(&event, &root);
                    let delivered = self.notify(message);
                    debug!(delivered, "Reload message sent");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Reload forwarder lagged, forcing reload");
                    self.notify(ReloadMessage::Reload);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// URL path of `file` when the server is rooted at `root`.
#[must_use]
pub fn url_path(root: &Path, file: &Path) -> String {
    format!("/{}", to_slash(&relative_to(file, root)))
}

fn message_for(event: &BuildEvent, root: &Path) -> ReloadMessage {
    match event {
        BuildEvent::StylesheetWritten { path } => ReloadMessage::CssUpdate {
            path: url_path(root, path),
            timestamp: now_ms(),
        },
        BuildEvent::HtmlChanged { .. } => ReloadMessage::Reload,
        BuildEvent::BuildFailed { message } => ReloadMessage::Error {
            message: message.clone(),
        },
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The browser client, served at [`CLIENT_PATH`].
#[must_use]
pub fn client_runtime(port: u16) -> String {
    CLIENT_RUNTIME
        .replace("__CASCADE_PORT__", &port.to_string())
        .replace("__CASCADE_SOCKET__", SOCKET_PATH)
}

/// Insert the client script tag before `</head>`, else `</body>`, else at the end.
#[must_use]
pub fn inject_client(html: &str) -> String {
    if html.contains(CLIENT_PATH) {
        return html.to_string();
    }
    let tag = format!(r#"<script type="module" src="{CLIENT_PATH}"></script>"#);
    let mut html = html.to_string();
    if let Some(pos) = html.find("</head>") {
        html.insert_str(pos, &format!("  {tag}\n  "));
    } else if let Some(pos) = html.find("</body>") {
        html.insert_str(pos, &format!("  {tag}\n  "));
    } else {
        html.push_str(&format!("\n{tag}"));
    }
    html
}

const CLIENT_RUNTIME: &str = r"
// cascade live-reload client
const port = __CASCADE_PORT__;
let connected = false;

function swapStylesheet(path, timestamp) {
  let swapped = false;
  for (const link of document.querySelectorAll('link[rel=stylesheet]')) {
    const url = new URL(link.href, location.href);
    if (url.pathname === path) {
      url.searchParams.set('t', String(timestamp));
      link.href = url.toString();
      swapped = true;
    }
  }
  if (!swapped) location.reload();
}

function connect() {
  const ws = new WebSocket(`ws://${location.hostname}:${port}__CASCADE_SOCKET__`);

  ws.onopen = () => {
    connected = true;
  };

  ws.onmessage = (event) => {
    const msg = JSON.parse(event.data);
    switch (msg.type) {
      case 'connected':
        console.log('[cascade] connected.');
        break;
      case 'reload':
        location.reload();
        break;
      case 'css-update':
        swapStylesheet(msg.path, msg.timestamp);
        break;
      case 'error':
        console.error('[cascade] build failed:\n' + msg.message);
        break;
    }
  };

  ws.onclose = () => {
    if (connected) {
      console.log('[cascade] server connection lost, retrying...');
      connected = false;
    }
    setTimeout(connect, 1000);
  };
}

connect();
";
