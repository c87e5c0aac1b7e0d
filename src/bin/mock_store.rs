//! Mock document store server
//!
//! In-memory stand-in for the remote catalog/cart store, for local runs
//! and end-to-end exercise with the simulator. Serves the same HTTP API
//! the engine's store client speaks:
//!
//! - `GET  /products/{key}`    - catalog point lookup (404 = not found)
//! - `PUT  /products/{key}`    - catalog upsert
//! - `GET  /carts/{id}`        - whole cart document (404 = no cart yet)
//! - `PUT  /carts/{id}`        - set whole cart document
//! - `PATCH /carts/{id}/items` - replace the items list
//! - `POST /carts/{id}/items`  - append one item
//!
//! The store holds a single cart document; the id segment is accepted but
//! not used to discriminate (single shared cart by design).
//!
//! Usage:
//!   cargo run --bin mock_store -- --port 9090

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use scancart::domain::cart::{CartDocument, CartLineItem, ProductRecord};
use scancart::io::store::{DocumentStore, ItemsPatch, MemoryStore};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_store")]
#[command(about = "Mock document store for local simulation")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "9090")]
    port: u16,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, "{\"error\":\"not found\"}".to_string())
}

fn bad_request(msg: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, format!("{{\"error\":\"{msg}\"}}"))
}

fn ok_empty() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, "{}".to_string())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    store: Arc<MemoryStore>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "body_read_failed");
            return Ok(bad_request("unreadable body"));
        }
    };

    let response = match (method, segments.as_slice()) {
        (Method::GET, ["products", key]) => {
            match store.get_product(&(*key).into()).await {
                Ok(Some(product)) => {
                    json_response(StatusCode::OK, serde_json::to_string(&product).unwrap_or_default())
                }
                Ok(None) => not_found(),
                Err(_) => json_response(StatusCode::INTERNAL_SERVER_ERROR, "{}".to_string()),
            }
        }
        (Method::PUT, ["products", _key]) => match serde_json::from_slice::<ProductRecord>(&body) {
            Ok(product) => {
                info!(name = %product.name, barcode = %product.barcode, "product_seeded");
                let _ = store.put_product(&product).await;
                ok_empty()
            }
            Err(e) => bad_request(&format!("invalid product: {e}")),
        },
        (Method::GET, ["carts", _id]) => match store.get_cart().await {
            Ok(Some(cart)) => {
                json_response(StatusCode::OK, serde_json::to_string(&cart).unwrap_or_default())
            }
            Ok(None) => not_found(),
            Err(_) => json_response(StatusCode::INTERNAL_SERVER_ERROR, "{}".to_string()),
        },
        (Method::PUT, ["carts", id]) => match serde_json::from_slice::<CartDocument>(&body) {
            Ok(doc) => {
                info!(cart_id = %id, items = %doc.items.len(), "cart_set");
                let _ = store.put_cart(&doc).await;
                ok_empty()
            }
            Err(e) => bad_request(&format!("invalid cart: {e}")),
        },
        (Method::PATCH, ["carts", id, "items"]) => {
            match serde_json::from_slice::<ItemsPatch>(&body) {
                Ok(patch) => match store.update_items(&patch.items).await {
                    Ok(()) => {
                        info!(cart_id = %id, items = %patch.items.len(), "cart_items_updated");
                        ok_empty()
                    }
                    Err(_) => not_found(),
                },
                Err(e) => bad_request(&format!("invalid items: {e}")),
            }
        }
        (Method::POST, ["carts", id, "items"]) => {
            match serde_json::from_slice::<CartLineItem>(&body) {
                Ok(item) => match store.append_item(&item).await {
                    Ok(()) => {
                        info!(cart_id = %id, barcode = %item.barcode, "cart_item_appended");
                        ok_empty()
                    }
                    Err(_) => not_found(),
                },
                Err(e) => bad_request(&format!("invalid item: {e}")),
            }
        }
        _ => not_found(),
    };

    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let store = Arc::new(MemoryStore::new());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %args.port, "mock_store_started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept_failed");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let store = store.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, store.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(peer = %peer, error = %e, "connection_error");
            }
        });
    }
}
