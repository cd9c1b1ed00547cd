use super::types::Payload;
use super::{Provider, Request, StreamUnit, UnitStream};
use crate::decoder::LineDecoder;
use crate::error::StreamTransportError;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::collections::VecDeque;

/// Streams line-delimited text from any generation endpoint. The body shape
/// comes from the request's [`Backend`](super::Backend), so one client
/// serves every operation.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    http: reqwest::Client,
}

impl HttpProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn headers(req: &Request) -> Result<HeaderMap, StreamTransportError> {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(tok) = &req.auth_token {
        let mut v = HeaderValue::from_str(&format!("Bearer {tok}"))?;
        v.set_sensitive(true);
        h.insert(AUTHORIZATION, v);
    }
    Ok(h)
}

enum Phase {
    Connect {
        http: reqwest::Client,
        req: Request,
    },
    Body(Body),
    Done,
}

struct Body {
    url: reqwest::Url,
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: LineDecoder,
    ready: VecDeque<String>,
}

async fn connect(
    http: &reqwest::Client,
    req: &Request,
) -> Result<reqwest::Response, StreamTransportError> {
    let mut builder = http
        .post(req.endpoint.clone())
        .headers(headers(req)?)
        .json(&Payload::for_request(req));
    if let Some(t) = req.timeout {
        builder = builder.timeout(t);
    }

    tracing::debug!(
        endpoint = %req.endpoint,
        op = %req.operation,
        backend = ?req.backend,
        "sending generation request"
    );

    let resp = builder
        .send()
        .await
        .map_err(|e| StreamTransportError::from_send(&req.endpoint, e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(StreamTransportError::Status { status, body });
    }
    Ok(resp)
}

async fn advance(phase: Phase) -> Option<(Result<StreamUnit, StreamTransportError>, Phase)> {
    let mut phase = phase;
    loop {
        phase = match phase {
            Phase::Connect { http, req } => match connect(&http, &req).await {
                Ok(resp) => Phase::Body(Body {
                    url: req.endpoint,
                    chunks: Box::pin(resp.bytes_stream()),
                    decoder: LineDecoder::new(),
                    ready: VecDeque::new(),
                }),
                Err(e) => {
                    tracing::warn!(
                        endpoint = %req.endpoint,
                        error = %e,
                        "generation request failed"
                    );
                    return Some((Err(e), Phase::Done));
                }
            },
            Phase::Body(mut body) => {
                if let Some(line) = body.ready.pop_front() {
                    return Some((Ok(StreamUnit::new(line)), Phase::Body(body)));
                }
                match body.chunks.next().await {
                    Some(Ok(chunk)) => {
                        tracing::trace!(len = chunk.len(), "response chunk");
                        let lines = body.decoder.feed(&chunk);
                        body.ready.extend(lines);
                        Phase::Body(body)
                    }
                    Some(Err(e)) => {
                        let e = StreamTransportError::from_body(&body.url, e);
                        tracing::warn!(endpoint = %body.url, error = %e, "response stream failed");
                        if body.decoder.pending() > 0 {
                            tracing::debug!(
                                endpoint = %body.url,
                                pending = body.decoder.pending(),
                                "dropping partial unit of failed stream"
                            );
                        }
                        return Some((Err(e), Phase::Done));
                    }
                    None => {
                        tracing::debug!(endpoint = %body.url, "response stream done");
                        return body
                            .decoder
                            .flush()
                            .map(|rest| (Ok(StreamUnit::new(rest)), Phase::Done));
                    }
                }
            }
            Phase::Done => return None,
        };
    }
}

impl Provider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn open_stream(&self, req: Request) -> UnitStream {
        let start = Phase::Connect {
            http: self.http.clone(),
            req,
        };
        Box::pin(stream::unfold(start, advance))
    }
}
