//! Mock open data platform serving parking guidance records with randomized occupancy.
//!
//! Usage: `parking-e2e-tests [--error-payload] <bind_addr>`. With `--error-payload`, the app
//! responds with an ArcGIS error envelope instead of features.

use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Request, Response,
};
use hyper_util::rt::TokioIo;
use rand::{rng, Rng};
use serde_json::json;
use tokio::{net::TcpListener, sync::watch};

use std::{convert::Infallible, env, future, net::SocketAddr};

/// `(OBJECTID, name, real_capa, randomize_real_fcap)` for mock facilities.
const FACILITIES: [(u32, &str, i64, bool); 3] = [
    (1, "Marktstätte", 300, true),
    (2, "Lago", 500, false),
    (3, "Bahnhof", 0, true),
];

fn features_payload(rng: &mut impl Rng) -> serde_json::Value {
    let features: Vec<_> = FACILITIES
        .iter()
        .map(|&(object_id, name, capacity, has_reading)| {
            let free_capacity = if !has_reading {
                serde_json::Value::Null
            } else if capacity > 0 {
                rng.random_range(0..=capacity).into()
            } else {
                json!(10)
            };
            json!({
                "attributes": {
                    "OBJECTID": object_id,
                    "id": f64::from(object_id),
                    "name": name,
                    "max_cap": capacity,
                    "type": "PH",
                    "lat": 47.66,
                    "lon": 9.17,
                    "real_fcap": free_capacity,
                    "real_capa": capacity,
                },
                "geometry": { "x": 9.17, "y": 47.66 },
            })
        })
        .collect();

    json!({
        "displayFieldName": "name",
        "geometryType": "esriGeometryPoint",
        "features": features,
    })
}

fn error_payload() -> serde_json::Value {
    json!({
        "error": { "code": 500, "message": "Unable to complete operation.", "details": [] }
    })
}

fn respond(error_mode: bool) -> Response<String> {
    let payload = if error_mode {
        error_payload()
    } else {
        features_payload(&mut rng())
    };
    let mut response = Response::new(payload.to_string());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut args: Vec<_> = env::args().skip(1).collect();
    let error_mode = if !args.is_empty() && args[0] == "--error-payload" {
        args.remove(0);
        true
    } else {
        false
    };

    let bind_address: SocketAddr = args
        .first()
        .expect("Bind address must be provided as first command-line arg")
        .parse()
        .expect("Bind address is invalid");

    let (stop_sender, mut stop_receiver) = watch::channel(());
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stop_sender.send_replace(());
    });

    let listener = TcpListener::bind(bind_address)
        .await
        .unwrap_or_else(|err| panic!("Failed binding to `{bind_address}`: {err}"));
    let local_addr = listener.local_addr().unwrap();
    println!("local_addr={local_addr}");
    // ^ Print the local server address so that it can be used in integration tests
    tracing::info!(%local_addr, error_mode, "Started mock parking data platform");

    loop {
        let stream = tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, _)) => stream,
                Err(err) => {
                    tracing::warn!(%err, "Failed accepting connection");
                    continue;
                }
            },
            _ = stop_receiver.changed() => break,
        };
        tokio::spawn(async move {
            let service = service_fn(move |_: Request<Incoming>| {
                future::ready(Ok::<_, Infallible>(respond(error_mode)))
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::warn!(%err, "Error serving connection");
            }
        });
    }
}
