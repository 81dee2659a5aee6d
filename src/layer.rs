//! Tower middleware wrapping an [`Authorizer`].

// std
use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};
// crates.io
use http::{Request, Response};
use tower::{Layer, Service};
// self
use crate::{_prelude::*, pipeline::Authorizer};

/// Layer that authorizes every request before it reaches the wrapped service.
#[derive(Clone, Debug)]
pub struct AuthorizeLayer {
	authorizer: Arc<Authorizer>,
}
impl AuthorizeLayer {
	/// Wrap services with `authorizer`.
	pub fn new(authorizer: Authorizer) -> Self {
		Self::shared(Arc::new(authorizer))
	}

	/// Wrap services with an authorizer that is also used elsewhere.
	pub fn shared(authorizer: Arc<Authorizer>) -> Self {
		Self { authorizer }
	}

	/// Authorizer applied by this layer.
	pub fn authorizer(&self) -> &Arc<Authorizer> {
		&self.authorizer
	}
}
impl<S> Layer<S> for AuthorizeLayer {
	type Service = AuthorizeService<S>;

	fn layer(&self, inner: S) -> Self::Service {
		AuthorizeService { inner, authorizer: self.authorizer.clone() }
	}
}

/// Service produced by [`AuthorizeLayer`].
///
/// Rejected requests are answered directly and never reach the inner service.
#[derive(Clone, Debug)]
pub struct AuthorizeService<S> {
	inner: S,
	authorizer: Arc<Authorizer>,
}
impl<S, B, R> Service<Request<B>> for AuthorizeService<S>
where
	S: Service<Request<B>, Response = Response<R>> + Clone + Send + 'static,
	S::Future: Send + 'static,
	B: Send + 'static,
	R: From<String>,
{
	type Error = S::Error;
	type Future =
		Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;
	type Response = Response<R>;

	fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
		self.inner.poll_ready(cx)
	}

	fn call(&mut self, mut request: Request<B>) -> Self::Future {
		let authorizer = self.authorizer.clone();
		// Drive the instance that was polled ready.
		let clone = self.inner.clone();
		let mut inner = std::mem::replace(&mut self.inner, clone);

		Box::pin(async move {
			match authorizer.authorize(&mut request).await {
				Ok(()) => inner.call(request).await,
				Err(rejection) => Ok(rejection.into_response()),
			}
		})
	}
}
