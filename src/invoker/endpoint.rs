//! Base invoker: one attempt against one resolved endpoint.
//!
//! # Responsibilities
//! - Resolve the endpoint (attribute override or default group)
//! - Build the outbound request (method override, URL rewrite, request id)
//! - Open the connection, relay the inbound body, await the response

use axum::http::{header, HeaderValue, Method};
use futures_util::future::{poll_fn, BoxFuture};
use futures_util::{FutureExt, SinkExt, StreamExt};
use url::Url;

use crate::context::{RequestContext, ATTR_REQUEST_ENDPOINT, ATTR_REQUEST_METHOD};
use crate::invoker::connector::{BodySink, BodyStream};
use crate::invoker::{EndpointResolver, Invocation, InvokeError, Invoker, OutboundRequest};
use crate::load_balancer::endpoint::ManagedEndpoint;

/// Invokes the endpoint picked by an [`EndpointResolver`].
#[derive(Debug)]
pub struct EndpointInvoker<R> {
    id: String,
    resolver: R,
}

impl<R: EndpointResolver> EndpointInvoker<R> {
    pub fn new(id: impl Into<String>, resolver: R) -> Self {
        Self {
            id: id.into(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    async fn invoke_once(
        &self,
        ctx: &mut RequestContext,
        body: &mut BodyStream,
    ) -> Result<Invocation, InvokeError> {
        let endpoint = self
            .resolver
            .resolve(ctx.attribute(ATTR_REQUEST_ENDPOINT))
            .ok_or(InvokeError::NoEndpoint)?;
        if !endpoint.available() {
            return Err(InvokeError::EndpointUnavailable(endpoint.name().to_string()));
        }

        let request = build_request(ctx, &endpoint)?;
        tracing::debug!(
            request_id = %ctx.request_id(),
            endpoint = %endpoint.name(),
            method = %request.method,
            url = %request.url,
            "Connecting to endpoint"
        );

        let connection = endpoint
            .connector()
            .connect(request)
            .await
            .map_err(|source| InvokeError::Connection {
                endpoint: endpoint.name().to_string(),
                source,
            })?;

        let bytes_sent = relay(body, connection.sink, &endpoint).await?;
        let response = connection.response.await.map_err(|source| InvokeError::Upstream {
            endpoint: endpoint.name().to_string(),
            source,
        })?;

        tracing::debug!(
            request_id = %ctx.request_id(),
            endpoint = %endpoint.name(),
            status = %response.status,
            bytes_sent,
            "Endpoint responded"
        );
        Ok(Invocation {
            endpoint,
            response,
            bytes_sent,
            attempts: 1,
        })
    }
}

impl<R: EndpointResolver> Invoker for EndpointInvoker<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        body: &'a mut BodyStream,
    ) -> BoxFuture<'a, Result<Invocation, InvokeError>> {
        self.invoke_once(ctx, body).boxed()
    }
}

/// Build the request sent to `endpoint`.
pub(crate) fn build_request(
    ctx: &RequestContext,
    endpoint: &ManagedEndpoint,
) -> Result<OutboundRequest, InvokeError> {
    let method = match ctx.attribute(ATTR_REQUEST_METHOD) {
        Some(value) => Method::from_bytes(value.as_bytes())
            .map_err(|_| InvokeError::MalformedRequest(format!("invalid method override '{value}'")))?,
        None => ctx.method().clone(),
    };

    let url = outbound_url(endpoint.target(), ctx.path_info(), ctx.query())?;

    let mut headers = ctx.headers().clone();
    headers.remove(header::HOST);
    let request_id = HeaderValue::from_str(&ctx.request_id().to_string())
        .map_err(|e| InvokeError::MalformedRequest(e.to_string()))?;
    headers.insert("x-request-id", request_id);

    Ok(OutboundRequest {
        method,
        url,
        headers,
        request_id: ctx.request_id(),
        endpoint: endpoint.name().to_string(),
    })
}

/// Endpoint target + path info + query. A request query replaces the target's.
fn outbound_url(target: &str, path_info: &str, query: Option<&str>) -> Result<Url, InvokeError> {
    let mut url = Url::parse(target)
        .map_err(|e| InvokeError::MalformedRequest(format!("invalid endpoint target '{target}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(InvokeError::MalformedRequest(format!(
            "endpoint target '{target}' is not a hierarchical URL"
        )));
    }

    let base = url.path().trim_end_matches('/');
    let path = if path_info.starts_with('/') {
        format!("{base}{path_info}")
    } else {
        format!("{base}/{path_info}")
    };
    url.set_path(&path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.set_query(Some(query));
    }
    Ok(url)
}

/// Write the inbound body into the connection.
///
/// The next chunk is pulled only once the sink is ready, so a full outbound
/// buffer pauses the inbound stream.
async fn relay(body: &mut BodyStream, mut sink: BodySink, endpoint: &ManagedEndpoint) -> Result<u64, InvokeError> {
    let upstream = |source| InvokeError::Upstream {
        endpoint: endpoint.name().to_string(),
        source,
    };

    let mut bytes_sent = 0u64;
    loop {
        poll_fn(|cx| sink.as_mut().poll_ready(cx)).await.map_err(upstream)?;
        let Some(chunk) = body.next().await else {
            break;
        };
        let chunk = chunk?;
        bytes_sent += chunk.len() as u64;
        sink.as_mut().start_send(chunk).map_err(upstream)?;
    }
    sink.close().await.map_err(upstream)?;
    Ok(bytes_sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::connector::tests::{RecordingConnector, RefusingConnector};
    use crate::invoker::connector::{BackendResponse, BodyError, Connection, Connector, ConnectorError};
    use crate::load_balancer::endpoint::EndpointDefinition;
    use crate::load_balancer::HealthState;
    use futures_util::Sink;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Resolves names from a fixed map; `None` resolves to "default".
    struct MapResolver(HashMap<String, Arc<ManagedEndpoint>>);

    impl MapResolver {
        fn with(endpoints: Vec<Arc<ManagedEndpoint>>) -> Self {
            Self(endpoints.into_iter().map(|e| (e.name().to_string(), e)).collect())
        }
    }

    impl EndpointResolver for MapResolver {
        fn resolve(&self, target_override: Option<&str>) -> Option<Arc<ManagedEndpoint>> {
            self.0.get(target_override.unwrap_or("default")).cloned()
        }
    }

    fn endpoint(name: &str, target: &str, connector: Arc<dyn Connector>) -> Arc<ManagedEndpoint> {
        Arc::new(ManagedEndpoint::new(EndpointDefinition::new(name, target, 1), connector))
    }

    fn body(chunks: &[&'static str]) -> BodyStream {
        let chunks: Vec<Result<Bytes, BodyError>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect();
        Box::pin(futures_util::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_invoke_relays_body() {
        let connector = Arc::new(RecordingConnector::default());
        let invoker = EndpointInvoker::new(
            "endpoint",
            MapResolver::with(vec![endpoint("default", "http://backend:8080/api/", connector.clone())]),
        );
        let mut ctx = RequestContext::new("api", Method::POST, "/v1/orders/7")
            .with_context_path("/v1")
            .with_query("expand=items");
        let mut stream = body(&["hello ", "world"]);

        let invocation = invoker.invoke(&mut ctx, &mut stream).await.unwrap();
        assert_eq!(invocation.response.status, StatusCode::OK);
        assert_eq!(invocation.bytes_sent, 11);
        assert_eq!(invocation.attempts, 1);
        assert_eq!(connector.body.lock().unwrap().as_slice(), b"hello world");

        let requests = connector.requests.lock().unwrap();
        assert_eq!(requests[0].url.as_str(), "http://backend:8080/api/orders/7?expand=items");
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(
            requests[0].headers.get("x-request-id").unwrap().to_str().unwrap(),
            ctx.request_id().to_string()
        );
    }

    #[tokio::test]
    async fn test_no_endpoint_makes_no_connection() {
        let invoker = EndpointInvoker::new("endpoint", MapResolver::with(vec![]));
        let mut ctx = RequestContext::new("api", Method::GET, "/");
        let mut stream = body(&[]);

        let err = invoker.invoke(&mut ctx, &mut stream).await.unwrap_err();
        assert!(matches!(err, InvokeError::NoEndpoint));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unavailable_endpoint() {
        let connector = Arc::new(RecordingConnector::default());
        let e = endpoint("default", "http://backend", connector.clone());
        e.set_health(HealthState::Unhealthy);
        let invoker = EndpointInvoker::new("endpoint", MapResolver::with(vec![e]));
        let mut ctx = RequestContext::new("api", Method::GET, "/");

        let err = invoker.invoke(&mut ctx, &mut body(&[])).await.unwrap_err();
        assert!(matches!(err, InvokeError::EndpointUnavailable(name) if name == "default"));
        assert!(connector.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overrides_from_attributes() {
        let connector = Arc::new(RecordingConnector::default());
        let invoker = EndpointInvoker::new(
            "endpoint",
            MapResolver::with(vec![
                endpoint("default", "http://default", connector.clone()),
                endpoint("canary", "http://canary", connector.clone()),
            ]),
        );
        let mut ctx = RequestContext::new("api", Method::GET, "/ping");
        ctx.set_attribute(ATTR_REQUEST_ENDPOINT, "canary");
        ctx.set_attribute(ATTR_REQUEST_METHOD, "DELETE");

        let invocation = invoker.invoke(&mut ctx, &mut body(&[])).await.unwrap();
        assert_eq!(invocation.endpoint.name(), "canary");
        let requests = connector.requests.lock().unwrap();
        assert_eq!(requests[0].url.as_str(), "http://canary/ping");
        assert_eq!(requests[0].method, Method::DELETE);
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let connector = Arc::new(RecordingConnector::default());
        let invoker = EndpointInvoker::new(
            "endpoint",
            MapResolver::with(vec![
                endpoint("default", "not a url", connector.clone()),
                endpoint("opaque", "mailto:ops@example.com", connector.clone()),
                endpoint("ok", "http://ok", connector.clone()),
            ]),
        );

        let mut ctx = RequestContext::new("api", Method::GET, "/");
        let err = invoker.invoke(&mut ctx, &mut body(&[])).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        ctx.set_attribute(ATTR_REQUEST_ENDPOINT, "opaque");
        let err = invoker.invoke(&mut ctx, &mut body(&[])).await.unwrap_err();
        assert!(matches!(err, InvokeError::MalformedRequest(_)));

        ctx.set_attribute(ATTR_REQUEST_ENDPOINT, "ok");
        ctx.set_attribute(ATTR_REQUEST_METHOD, "GE T");
        let err = invoker.invoke(&mut ctx, &mut body(&[])).await.unwrap_err();
        assert!(matches!(err, InvokeError::MalformedRequest(_)));

        assert!(connector.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_leaves_body_unread() {
        let invoker = EndpointInvoker::new(
            "endpoint",
            MapResolver::with(vec![endpoint("default", "http://down", Arc::new(RefusingConnector))]),
        );
        let mut ctx = RequestContext::new("api", Method::POST, "/");
        let mut stream = body(&["payload"]);

        let err = invoker.invoke(&mut ctx, &mut stream).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_outbound_url() {
        assert_eq!(outbound_url("http://h", "/a", None).unwrap().as_str(), "http://h/a");
        assert_eq!(outbound_url("http://h/base", "/a/b", None).unwrap().as_str(), "http://h/base/a/b");
        assert_eq!(outbound_url("http://h/base/", "/", Some("x=1")).unwrap().as_str(), "http://h/base/?x=1");
        assert_eq!(outbound_url("http://h/?k=v", "/a", None).unwrap().as_str(), "http://h/a?k=v");
    }

    /// Sink whose outbound buffer never drains.
    struct StalledSink;

    impl Sink<Bytes> for StalledSink {
        type Error = ConnectorError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Bytes) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[derive(Debug)]
    struct StalledConnector;

    impl Connector for StalledConnector {
        fn connect<'a>(&'a self, _request: OutboundRequest) -> BoxFuture<'a, Result<Connection, ConnectorError>> {
            async {
                Ok(Connection {
                    sink: Box::pin(StalledSink),
                    response: async { Ok(BackendResponse::empty(StatusCode::OK)) }.boxed(),
                })
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_full_sink_pauses_inbound_body() {
        let invoker = EndpointInvoker::new(
            "endpoint",
            MapResolver::with(vec![endpoint("default", "http://slow", Arc::new(StalledConnector))]),
        );
        let mut ctx = RequestContext::new("api", Method::POST, "/");
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let mut stream: BodyStream = Box::pin(body(&["a", "b", "c"]).inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let result = tokio::time::timeout(Duration::from_millis(100), invoker.invoke(&mut ctx, &mut stream)).await;
        assert!(result.is_err());
        assert_eq!(pulled.load(Ordering::SeqCst), 0);
    }
}
