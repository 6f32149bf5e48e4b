use {
    anyhow::{Context, Result},
    axum::{Router, extract::RawQuery, response::Html, routing::get},
    tokio::{net::TcpListener, sync::mpsc},
};

const CALLBACK_PAGE: &str = "<html><body><p>Login received. You can close this \
window and return to the terminal.</p></body></html>";

/// One-shot loopback server for the provider redirect.
pub struct CallbackServer;

impl CallbackServer {
    /// Bind `127.0.0.1:port`, wait for a single hit on `path`, and return the
    /// full callback URL as the browser delivered it.
    pub async fn wait_for_callback(port: u16, path: &str) -> Result<String> {
        let (tx, mut rx) = mpsc::channel::<Option<String>>(1);

        let app = Router::new().route(
            path,
            get(move |RawQuery(query): RawQuery| {
                let tx = tx.clone();
                async move {
                    let _ = tx.try_send(query);
                    Html(CALLBACK_PAGE)
                }
            }),
        );

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind callback port {port}"))?;
        let server = tokio::spawn(async move { axum::serve(listener, app).await });

        let query = rx
            .recv()
            .await
            .context("callback server stopped before a redirect arrived")?;

        // Give the response a moment to reach the browser before tearing down.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        server.abort();

        Ok(match query {
            Some(query) => format!("http://127.0.0.1:{port}{path}?{query}"),
            None => format!("http://127.0.0.1:{port}{path}"),
        })
    }
}
