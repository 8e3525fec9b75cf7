//! # Query API Module
//!
//! Read-only HTTP/1.1 access to stored frame records.
//!
//! Routes:
//! - `GET /` - liveness
//! - `GET /api/data?skip=&limit=` - records newest first
//! - `GET /api/data/latest` - newest record, 404 when the store is empty

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::config::ApiConfig;
use crate::error::Result;
use crate::store::{SharedStore, MAX_PAGE_LIMIT};

/// Message returned by the liveness route
pub const STATUS_MESSAGE: &str = "Aqua Guard API is running.";

/// Shared state handed to every request
pub struct ApiState {
    store: SharedStore,
    default_limit: u32,
    max_limit: u32,
}

impl ApiState {
    pub fn new(store: SharedStore, config: &ApiConfig) -> Self {
        Self {
            store,
            default_limit: config.default_limit,
            max_limit: config.max_limit.min(MAX_PAGE_LIMIT),
        }
    }
}

/// Validated pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u32,
}

/// Parse `skip`/`limit` from a query string; unknown keys are ignored
pub fn parse_page(query: Option<&str>, default_limit: u32, max_limit: u32) -> std::result::Result<Page, String> {
    let mut page = Page { skip: 0, limit: default_limit };

    for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "skip" => {
                let skip: i64 = value
                    .parse()
                    .map_err(|_| format!("skip must be an integer, got '{}'", value))?;
                page.skip = u64::try_from(skip).map_err(|_| "skip must not be negative".to_string())?;
            }
            "limit" => {
                let limit: i64 = value
                    .parse()
                    .map_err(|_| format!("limit must be an integer, got '{}'", value))?;
                if limit <= 0 {
                    return Err("limit must be greater than 0".to_string());
                }
                page.limit = u32::try_from(limit).unwrap_or(u32::MAX).min(max_limit);
            }
            _ => {}
        }
    }

    Ok(page)
}

/// Dispatch one request
pub async fn route(state: &ApiState, method: &Method, path: &str, query: Option<&str>) -> Response<Full<Bytes>> {
    let known = matches!(path, "/" | "/api/data" | "/api/data/latest");
    if !known {
        return detail(StatusCode::NOT_FOUND, "Not Found");
    }
    if *method != Method::GET {
        let mut response = detail(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(ALLOW, hyper::header::HeaderValue::from_static("GET"));
        return response;
    }

    match path {
        "/" => json_response(StatusCode::OK, &json!({ "status": "ok", "message": STATUS_MESSAGE })),
        "/api/data" => {
            let page = match parse_page(query, state.default_limit, state.max_limit) {
                Ok(page) => page,
                Err(msg) => return detail(StatusCode::BAD_REQUEST, &msg),
            };
            match state.store.list_recent(page.skip, page.limit).await {
                Ok(records) => json_response(StatusCode::OK, &records),
                Err(e) => {
                    warn!("Listing records failed: {}", e);
                    detail(StatusCode::SERVICE_UNAVAILABLE, "record store unavailable")
                }
            }
        }
        _ => match state.store.latest().await {
            Ok(Some(record)) => json_response(StatusCode::OK, &record),
            Ok(None) => detail(StatusCode::NOT_FOUND, "no data received yet"),
            Err(e) => {
                warn!("Fetching latest record failed: {}", e);
                detail(StatusCode::SERVICE_UNAVAILABLE, "record store unavailable")
            }
        },
    }
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(bytes)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"bad response")))),
        Err(e) => {
            warn!("Failed to serialize response: {}", e);
            let mut response = Response::new(Full::new(Bytes::from_static(b"{\"detail\":\"serialization failed\"}")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

fn detail(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "detail": message }))
}

/// Bind the API listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("Query API listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve requests until `shutdown` fires; one task per connection
pub async fn serve(listener: TcpListener, state: Arc<ApiState>, shutdown: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, peer, state).await {
                                debug!("API connection error from {}: {}", peer, err);
                            }
                        });
                    }
                    Err(err) => warn!("API accept error: {}", err),
                }
            }
        }
    }
    info!("Query API stopped");
    Ok(())
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ApiState>) -> Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        async move {
            let response = route(&state, &method, &path, query.as_deref()).await;
            debug!("{} {} {} -> {}", peer, method, path, response.status());
            Ok::<_, Infallible>(response)
        }
    });
    http1::Builder::new().serve_connection(io, service).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::record::{FrameRecord, NewFrameRecord};
    use crate::store::{MemoryStore, RecordStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::Value;

    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn append(&self, _record: NewFrameRecord) -> Result<i64> {
            Err(IngestError::StoreUnavailable("disk full".to_string()))
        }

        async fn list_recent(&self, _skip: u64, _limit: u32) -> Result<Vec<FrameRecord>> {
            Err(IngestError::StoreUnavailable("disk full".to_string()))
        }

        async fn latest(&self) -> Result<Option<FrameRecord>> {
            Err(IngestError::StoreUnavailable("disk full".to_string()))
        }
    }

    fn state(store: SharedStore) -> ApiState {
        ApiState::new(store, &ApiConfig::default())
    }

    async fn seeded_state(n: i64) -> ApiState {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            let ts = Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap();
            store.append(NewFrameRecord::raw(format!("frame {}", i), ts)).await.unwrap();
        }
        state(store)
    }

    async fn get(state: &ApiState, path: &str, query: Option<&str>) -> (StatusCode, Value) {
        let response = route(state, &Method::GET, path, query).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_parse_page_defaults() {
        assert_eq!(parse_page(None, 100, 1000), Ok(Page { skip: 0, limit: 100 }));
        assert_eq!(parse_page(Some(""), 100, 1000), Ok(Page { skip: 0, limit: 100 }));
    }

    #[test]
    fn test_parse_page_values() {
        assert_eq!(
            parse_page(Some("skip=20&limit=5&sort=asc"), 100, 1000),
            Ok(Page { skip: 20, limit: 5 })
        );
    }

    #[test]
    fn test_parse_page_decodes_percent_encoding() {
        assert_eq!(
            parse_page(Some("skip=%31&limit=%32"), 100, 1000),
            Ok(Page { skip: 1, limit: 2 })
        );
        assert_eq!(parse_page(Some("limit=+7"), 100, 1000), Err("limit must be an integer, got ' 7'".to_string()));
    }

    #[tokio::test]
    async fn test_list_with_encoded_query() {
        let state = seeded_state(5).await;
        let (status, body) = get(&state, "/api/data", Some("skip=%31&limit=%32")).await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["payload"], "frame 3");
    }

    #[test]
    fn test_parse_page_clamps_limit() {
        assert_eq!(parse_page(Some("limit=5000"), 100, 1000), Ok(Page { skip: 0, limit: 1000 }));
        assert_eq!(
            parse_page(Some("limit=99999999999"), 100, 1000),
            Ok(Page { skip: 0, limit: 1000 })
        );
    }

    #[test]
    fn test_parse_page_rejects_bad_values() {
        assert!(parse_page(Some("skip=-1"), 100, 1000).is_err());
        assert!(parse_page(Some("skip=abc"), 100, 1000).is_err());
        assert!(parse_page(Some("limit=0"), 100, 1000).is_err());
        assert!(parse_page(Some("limit=-5"), 100, 1000).is_err());
        assert!(parse_page(Some("limit="), 100, 1000).is_err());
    }

    #[tokio::test]
    async fn test_root_status() {
        let state = seeded_state(0).await;
        let (status, body) = get(&state, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["message"], STATUS_MESSAGE);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let state = seeded_state(5).await;

        let (status, body) = get(&state, "/api/data", Some("skip=1&limit=2")).await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["payload"], "frame 3");
        assert_eq!(items[1]["payload"], "frame 2");
        assert_eq!(items[0]["device_id"], "unknown-sender");
        assert!(items[0]["timestamp"].as_str().unwrap().starts_with("2023-11-14T"));
    }

    #[tokio::test]
    async fn test_list_default_page() {
        let state = seeded_state(3).await;
        let (status, body) = get(&state, "/api/data", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_bad_query_is_400() {
        let state = seeded_state(1).await;
        let (status, body) = get(&state, "/api/data", Some("limit=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn test_latest() {
        let state = seeded_state(3).await;
        let (status, body) = get(&state, "/api/data/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payload"], "frame 2");
        assert_eq!(body["id"], 3);
    }

    #[tokio::test]
    async fn test_latest_on_empty_store_is_404() {
        let state = seeded_state(0).await;
        let (status, body) = get(&state, "/api/data/latest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.get("id").is_none());
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let state = seeded_state(0).await;
        let (status, _) = get(&state, "/api/other", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_get_is_405() {
        let state = seeded_state(0).await;
        let response = route(&state, &Method::POST, "/api/data", None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), "GET");
    }

    #[tokio::test]
    async fn test_store_fault_is_503() {
        let state = state(Arc::new(BrokenStore));
        let (status, _) = get(&state, "/api/data", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(&state, "/api/data/latest", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::new(seeded_state(2).await), shutdown.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /api/data/latest HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);

        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("application/json"));
        assert!(text.contains("\"payload\":\"frame 1\""));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
