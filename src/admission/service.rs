use super::controller::{Controller, Verdict};
use futures::future::{poll_fn, BoxFuture};
use std::mem;
use std::task::{Context, Poll};
use tower::{BoxError, Service};

/// Enforces the controller's concurrency limit on the inner service.
///
/// Requests over the limit wait in the controller's queue rather than
/// failing. Once shutdown begins, requests fail with
/// [`Rejection::ShuttingDown`](super::Rejection::ShuttingDown).
#[derive(Clone, Debug)]
pub struct AdmissionLimit<S> {
    inner: S,
    controller: Controller,
}

impl<S> AdmissionLimit<S> {
    pub fn new(inner: S, controller: Controller) -> Self {
        Self { inner, controller }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, Request> Service<Request> for AdmissionLimit<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The inner service is driven to readiness only once a slot is held.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // Admission happens here rather than in the returned future so that
        // queue order follows call order.
        let verdict = self.controller.try_admit();
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let _token = match verdict {
                Verdict::Admitted(token) => token,
                Verdict::Queued { deferred, .. } => deferred.await?,
                Verdict::Rejected(rejection) => return Err(BoxError::from(rejection)),
            };
            poll_fn(|cx| inner.poll_ready(cx))
                .await
                .map_err(Into::<BoxError>::into)?;
            inner.call(request).await.map_err(Into::<BoxError>::into)
        })
    }
}
