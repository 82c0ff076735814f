use super::{AdmissionLimit, Controller};
use tower_layer::Layer;

/// Admits requests to the wrapped service through a shared [`Controller`].
#[derive(Clone, Debug)]
pub struct AdmissionLimitLayer {
    controller: Controller,
}

impl AdmissionLimitLayer {
    pub fn new(controller: Controller) -> Self {
        Self { controller }
    }
}

impl<S> Layer<S> for AdmissionLimitLayer {
    type Service = AdmissionLimit<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionLimit::new(service, self.controller.clone())
    }
}
