//! Test helpers.

use hyper::{server::conn::http1, service::service_fn, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use reqwest::Url;
use tokio::{net::TcpListener, task::JoinHandle};

use std::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug)]
struct MockState {
    body: String,
    status: StatusCode,
    delay: Duration,
    last_query: Option<String>,
    request_count: usize,
}

/// Mock upstream serving a fixed JSON payload on any path.
#[derive(Debug)]
pub(crate) struct MockUpstream {
    local_addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
    server_task: JoinHandle<()>,
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

impl MockUpstream {
    pub(crate) async fn spawn(body: &str) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState {
            body: body.to_owned(),
            status: StatusCode::OK,
            delay: Duration::ZERO,
            last_query: None,
            request_count: 0,
        }));

        let state_for_server = state.clone();
        let server_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = state_for_server.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                        let state = state.clone();
                        let query = req.uri().query().map(str::to_owned);
                        async move { Ok::<_, Infallible>(Self::respond(&state, query).await) }
                    });
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                        .ok();
                });
            }
        });

        Self {
            local_addr,
            state,
            server_task,
        }
    }

    async fn respond(state: &Mutex<MockState>, query: Option<String>) -> Response<String> {
        let (status, body, delay) = {
            let mut state = state.lock().unwrap();
            state.request_count += 1;
            state.last_query = query;
            (state.status, state.body.clone(), state.delay)
        };
        tokio::time::sleep(delay).await;
        Response::builder().status(status).body(body).unwrap()
    }

    pub(crate) fn url(&self) -> Url {
        Url::parse(&format!("http://{}/MapServer/0/query", self.local_addr)).unwrap()
    }

    pub(crate) fn set_body(&self, body: &str) {
        self.state.lock().unwrap().body = body.to_owned();
    }

    pub(crate) fn set_status(&self, status: u16) {
        self.state.lock().unwrap().status = StatusCode::from_u16(status).unwrap();
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub(crate) fn last_query(&self) -> Option<String> {
        self.state.lock().unwrap().last_query.clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.state.lock().unwrap().request_count
    }
}
