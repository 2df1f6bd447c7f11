use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::Rejection;

/// Receives rejections that were never observed by any consumer.
pub(crate) type RejectionHandler = Arc<dyn Fn(&Rejection) + Send + Sync>;

/// Sink for unhandled-rejection reports.
///
/// A state object reports at most once, when it is recycled, and only if its rejection was
/// neither observed nor deliberately suppressed.
#[derive(Default)]
pub(crate) struct Diagnostics {
    handler: Option<RejectionHandler>,
}

impl Diagnostics {
    pub(crate) fn with_handler(handler: RejectionHandler) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    pub(crate) fn report_unhandled(&self, rejection: &Rejection) {
        match &self.handler {
            Some(handler) => handler(rejection),
            None => {
                error!(%rejection, "promise was rejected but nobody observed the rejection");
            }
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("custom_handler", &self.handler.is_some())
            .finish()
    }
}
