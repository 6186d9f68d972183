#![forbid(unsafe_code)]

//! Backend transport. The request handler only sees the [`Proxy`] trait so
//! the shed/forward logic can be exercised against a stub backend; the
//! production implementation is a pooled hyper HTTP/1.1 client.

use async_trait::async_trait;
use http::Uri;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use umbra_core::{UmbraError, UmbraResult};

/// Body type flowing through the data plane in both directions.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full_body<T: Into<Bytes>>(data: T) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Opaque forwarding collaborator: hand the (possibly rewritten) request to
/// the backend and return its response.
#[async_trait]
pub trait Proxy: Send + Sync {
    async fn forward(&self, req: Request<ProxyBody>) -> UmbraResult<Response<ProxyBody>>;
}

/// Forwards requests to a single backend over pooled HTTP/1.1 connections.
pub struct HttpProxy {
    client: Client<HttpConnector, ProxyBody>,
    backend: String,
}

impl HttpProxy {
    pub fn new(backend_host: &str, backend_port: u16, max_conns: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(max_conns)
            .build_http();
        Self {
            client,
            backend: format!("{backend_host}:{backend_port}"),
        }
    }
}

#[async_trait]
impl Proxy for HttpProxy {
    async fn forward(&self, mut req: Request<ProxyBody>) -> UmbraResult<Response<ProxyBody>> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", self.backend, path_and_query)
            .parse::<Uri>()
            .map_err(|err| UmbraError::Proxy(err.to_string()))?;
        *req.uri_mut() = uri;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|err| UmbraError::Proxy(err.to_string()))?;

        Ok(response.map(BodyExt::boxed))
    }
}
