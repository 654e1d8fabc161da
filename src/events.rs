use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::request::Request;
use crate::transport::{DownloadJob, Transport, TransportEvents};

/// Caller-supplied download notifications. All methods default to no-ops.
///
/// The orchestrator fires at most one `download_succeeded` or terminal
/// `download_failed` per request per run; intermediate fallback failures are
/// not reported.
pub trait Listener: Send + Sync {
    fn download_started(&self, _request: &Request) {}
    fn download_succeeded(&self, _request: &Request) {}
    fn download_failed(&self, _request: &Request) {}
}

impl<L: Listener + ?Sized> Listener for std::sync::Arc<L> {
    fn download_started(&self, request: &Request) {
        (**self).download_started(request);
    }

    fn download_succeeded(&self, request: &Request) {
        (**self).download_succeeded(request);
    }

    fn download_failed(&self, request: &Request) {
        (**self).download_failed(request);
    }
}

/// Invoke a listener callback inside a failure boundary: a panicking listener
/// is logged and discarded, never propagated into transport internals.
pub(crate) fn notify<F: FnOnce()>(label: &str, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!(callback = label, "listener callback panicked");
    }
}

/// Adapts raw transport events to orchestrator semantics: propagates
/// cancellation into the active downloader, marks request outcomes, and
/// forwards notifications to the caller's listener. Holds no ownership over
/// the transport or the requests it mutates.
pub(crate) struct EventBridge<'a> {
    cancelled: &'a AtomicBool,
    listener: Option<&'a dyn Listener>,
    transport: &'a dyn Transport,
    requests: &'a mut [Request],
}

impl<'a> EventBridge<'a> {
    pub(crate) fn new(
        cancelled: &'a AtomicBool,
        listener: Option<&'a dyn Listener>,
        transport: &'a dyn Transport,
        requests: &'a mut [Request],
    ) -> Self {
        Self {
            cancelled,
            listener,
            transport,
            requests,
        }
    }

    fn cancel_if_requested(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            self.transport.cancel();
            return true;
        }
        false
    }
}

impl TransportEvents for EventBridge<'_> {
    fn started(&mut self, job: &DownloadJob) {
        if self.cancel_if_requested() {
            return;
        }
        let Some(request) = self.requests.get(job.request) else {
            return;
        };
        if let Some(listener) = self.listener {
            notify("download_started", || listener.download_started(request));
        }
    }

    fn succeeded(&mut self, job: &DownloadJob) {
        if self.cancel_if_requested() {
            return;
        }
        let Some(request) = self.requests.get_mut(job.request) else {
            return;
        };
        request.mark_downloaded();
        tracing::debug!(unit = %request.unit_key(), url = %job.url, "download succeeded");
        if let Some(listener) = self.listener {
            notify("download_succeeded", || {
                listener.download_succeeded(request)
            });
        }
    }

    fn failed(&mut self, job: &DownloadJob, error: &str) {
        if self.cancel_if_requested() {
            return;
        }
        let Some(request) = self.requests.get_mut(job.request) else {
            return;
        };
        request.record_error(error);
        tracing::debug!(unit = %request.unit_key(), url = %job.url, error, "download failed");
        if request.has_source() {
            // Another candidate may still satisfy this request; stay silent.
            return;
        }
        if let Some(listener) = self.listener {
            notify("download_failed", || listener.download_failed(request));
        }
    }
}
