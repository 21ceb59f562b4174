//! Static signing page served to the wallet's in-app browser

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub fn signing_page() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from_static(INDEX_HTML.as_bytes())))
        .unwrap()
}
