//! HTTP request logging middleware.
//!
//! Times every request handled by the router and hands a flat
//! [`RequestLogRecord`] to a [`RequestLogger`] once response headers are
//! produced.

use crate::logging::logger::RequestLogger;
use crate::logging::record::RequestLogRecord;
use axum::{
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap},
    response::Response,
};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Tower layer for request logging
#[derive(Clone)]
pub struct RequestLogLayer {
    logger: RequestLogger,
}

impl RequestLogLayer {
    pub fn new(logger: RequestLogger) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Tower service for request logging
#[derive(Clone)]
pub struct RequestLogService<S> {
    inner: S,
    logger: RequestLogger,
}

/// First `x-forwarded-for` hop, else the peer address, else `-`
fn client_ip(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

impl<S> Service<Request> for RequestLogService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let start = Instant::now();
        let method = req.method().to_string();
        let url = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let ip = client_ip(&req);
        let logger = self.logger.clone();

        let future = self.inner.call(req);

        Box::pin(async move {
            let result = future.await;

            // Failed inner services produce no response to describe
            if let Ok(response) = &result {
                logger.write(RequestLogRecord {
                    method,
                    url,
                    ip,
                    status: Some(u64::from(response.status().as_u16())),
                    content_length: content_length(response.headers()),
                    response_time: Some(start.elapsed().as_secs_f64() * 1000.0),
                    ..Default::default()
                });
            }

            result
        })
    }
}
