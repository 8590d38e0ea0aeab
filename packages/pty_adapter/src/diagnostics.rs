use std::error::Error;

use tracing::{debug, warn};

/// Where the adapter reports what happened. Implementations must not panic
/// or block; the adapter never looks at the outcome.
pub trait Diagnostics: Send + Sync {
    fn debug(&self, label: &str, message: &str);

    fn warn(&self, label: &str, message: &str, error: Option<&(dyn Error + 'static)>);
}

/// Forwards to `tracing`, with the label as a structured field
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn debug(&self, label: &str, message: &str) {
        debug!(label = %label, "{}", message);
    }

    fn warn(&self, label: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        match error {
            Some(err) => warn!(label = %label, error = %err, "{}", message),
            None => warn!(label = %label, "{}", message),
        }
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for std::sync::Arc<D> {
    fn debug(&self, label: &str, message: &str) {
        (**self).debug(label, message)
    }

    fn warn(&self, label: &str, message: &str, error: Option<&(dyn Error + 'static)>) {
        (**self).warn(label, message, error)
    }
}
