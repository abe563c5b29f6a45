use std::{convert::Infallible, net::SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use bulwark::RequestContext;

use crate::types::{ConnectionInfo, Principal};

impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        // Header values that are not visible ASCII are ignored
        let headers = &parts.headers;
        let mut context = RequestContext::from_headers(
            |name| headers.get(name).and_then(|value| value.to_str().ok()),
            peer,
        );

        if let Some(Principal(principal)) = parts.extensions.get::<Principal>() {
            context = context.with_principal(principal.clone());
        }

        tracing::trace!(ip = %context.client_ip(), "Resolved request context");

        Ok(ConnectionInfo(context))
    }
}
