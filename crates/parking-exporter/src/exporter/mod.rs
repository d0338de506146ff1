//! `MetricsExporter` and closely related types.

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, HeaderMap, Method, Request,
    Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{
    io,
    net::{TcpListener, TcpStream},
    sync::watch,
};

use std::{
    convert::Infallible,
    fmt,
    future::{self, Future},
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_metrics::{Format, MetricStore, Registry};


/// Path on which metrics are served.
pub const METRICS_PATH: &str = "/metrics";

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct MetricsExporterInner {
    store: Arc<MetricStore>,
    format: Option<Format>,
}

impl MetricsExporterInner {
    fn negotiate_format(&self, headers: &HeaderMap) -> Format {
        if let Some(format) = self.format {
            return format;
        }
        let accepts_open_metrics = headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("application/openmetrics-text"));
        if accepts_open_metrics {
            Format::OpenMetrics
        } else {
            Format::Prometheus
        }
    }

    fn render_body(&self, format: Format) -> String {
        let started_at = Instant::now();
        let snapshot = self.store.snapshot();
        let mut buffer = String::with_capacity(256 + snapshot.len() * 128);
        Registry::from_snapshot(&snapshot)
            .encode(&mut buffer, format)
            .ok();
        // ^ Writing to a string never fails.

        let latency = started_at.elapsed();
        let scraped_size = buffer.len();
        tracing::debug!(
            latency_sec = latency.as_secs_f64(),
            scraped_size,
            ?format,
            frame_count = snapshot.update_frame_count(),
            "Scraped parking metrics in {latency:?} (scraped size: {scraped_size}B)"
        );
        buffer
    }

    fn render(&self, request: &Request<Incoming>) -> Response<String> {
        if request.uri().path() != METRICS_PATH {
            return Self::error_response(StatusCode::NOT_FOUND, "Not found");
        }
        let method = request.method();
        if *method != Method::GET && *method != Method::HEAD {
            let mut response =
                Self::error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let format = self.negotiate_format(request.headers());
        let body = self.render_body(format);
        let mut response = Response::new(body);
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(format.content_type()),
        );
        response
    }

    fn error_response(status: StatusCode, message: &str) -> Response<String> {
        let mut response = Response::new(format!("{message}\n"));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// Exporter of parking metrics to Prometheus.
///
/// The exporter encodes the current [`MetricStore`] snapshot on each scrape; scrapes never
/// trigger fetching data from the upstream.
///
/// # Examples
///
/// ```no_run
/// # use std::{net::Ipv4Addr, sync::Arc};
/// # use parking_exporter::MetricsExporter;
/// # use parking_metrics::MetricStore;
/// # async fn test() -> std::io::Result<()> {
/// let store = Arc::new(MetricStore::new());
/// let (stop_sender, mut stop_receiver) = tokio::sync::watch::channel(());
/// let exporter = MetricsExporter::new(store).with_graceful_shutdown(async move {
///     stop_receiver.changed().await.ok();
/// });
/// let server = exporter.bind((Ipv4Addr::LOCALHOST, 4276).into()).await?;
/// println!("Serving metrics on {}", server.local_addr());
/// tokio::spawn(server.start());
/// // Later, to stop the server:
/// stop_sender.send_replace(());
/// # Ok(())
/// # }
/// ```
pub struct MetricsExporter<'a> {
    inner: MetricsExporterInner,
    shutdown_future: Pin<Box<dyn Future<Output = ()> + Send + 'a>>,
}

impl fmt::Debug for MetricsExporter<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsExporter")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<'a> MetricsExporter<'a> {
    /// Creates an exporter serving metrics from the provided store.
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            inner: MetricsExporterInner {
                store,
                format: None,
            },
            shutdown_future: Box::pin(future::pending()),
        }
    }

    /// Forces the export [`Format`]. By default, the format is negotiated based on the `Accept`
    /// header of each request: OpenMetrics if the scraper accepts it, Prometheus text otherwise.
    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.inner.format = Some(format);
        self
    }

    /// Configures graceful shutdown for the exporter server.
    #[must_use]
    pub fn with_graceful_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Future<Output = ()> + Send + 'a,
    {
        self.shutdown_future = Box::pin(shutdown);
        self
    }

    /// Starts the server on the specified address. This future resolves when the server is shut down.
    ///
    /// The server will expose the following endpoints:
    ///
    /// - `GET` / `HEAD` on `/metrics`: serves the metrics in the text format
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn start(self, bind_address: SocketAddr) -> io::Result<()> {
        tracing::info!("Starting Prometheus exporter web server on {bind_address}");
        self.bind(bind_address).await?.start().await?;
        tracing::info!("Prometheus metrics exporter server shut down");
        Ok(())
    }

    /// Creates an HTTP exporter server and binds it to the specified address.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(self, bind_address: SocketAddr) -> io::Result<MetricsServer<'a>> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        Ok(self.serve(listener, local_addr))
    }

    fn serve<L>(mut self, mut listener: L, local_addr: SocketAddr) -> MetricsServer<'a>
    where
        L: ConnectionListener + 'a,
    {
        let server = async move {
            let (started_shutdown_sender, started_shutdown) = watch::channel(());
            loop {
                let res = tokio::select! {
                    res = listener.accept() => res,
                    () = &mut self.shutdown_future => break,
                };
                let stream = match res {
                    Ok(stream) => stream,
                    Err(err) => {
                        // E.g., exhausted file descriptors; open connections need time to close.
                        tracing::warn!(%err, "Failed accepting connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let inner = self.inner.clone();
                let mut started_shutdown = started_shutdown.clone();
                tokio::spawn(async move {
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(|req| future::ready(Ok::<_, Infallible>(inner.render(&req)))),
                    );
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        _ = started_shutdown.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                        res = conn.as_mut() => res,
                    };
                    if let Err(err) = res {
                        tracing::warn!(%err, "Error serving connection");
                    }
                });
            }

            tracing::info!("Stop signal received, Prometheus metrics exporter is shutting down");
            // Send the graceful shutdown signal to all alive connections.
            drop(started_shutdown);
            started_shutdown_sender.send_replace(());
            // Wait until all connections are dropped.
            started_shutdown_sender.closed().await;

            Ok(())
        };

        MetricsServer {
            server: Box::pin(server),
            local_addr,
        }
    }
}

/// Source of incoming connections for the exporter server.
trait ConnectionListener: Send {
    fn accept(&mut self) -> impl Future<Output = io::Result<TcpStream>> + Send;
}

impl ConnectionListener for TcpListener {
    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, _) = TcpListener::accept(self).await?;
        Ok(stream)
    }
}

/// Metrics server bound to a certain local address returned by [`MetricsExporter::bind()`].
///
/// Useful e.g. if you need to find out which port the server was bound to if the 0th port was specified.
#[must_use = "Server should be `start()`ed"]
pub struct MetricsServer<'a> {
    server: Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>,
    local_addr: SocketAddr,
}

impl fmt::Debug for MetricsServer<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("MetricsServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsServer<'_> {
    /// Returns the local address this server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts this server. Resolves once the server is shut down.
    ///
    /// Errors accepting connections are logged and do not stop the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails irrecoverably. Accept errors are not treated as such.
    pub async fn start(self) -> io::Result<()> {
        self.server.await
    }
}
