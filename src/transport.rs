use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::WarehouseError;
use crate::source::ContentSource;

/// One transfer handed to a downloader: fetch `url` into `destination`.
/// `request` is an opaque back-reference into the orchestration run's request
/// list; transports carry it through to their events untouched.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub request: usize,
}

/// Raw downloader callbacks, delivered on the dispatching thread.
pub trait TransportEvents {
    fn started(&mut self, job: &DownloadJob);
    fn succeeded(&mut self, job: &DownloadJob);
    fn failed(&mut self, job: &DownloadJob, error: &str);
}

/// A downloader bound to one source. `download` blocks until the batch drains
/// or cancellation is observed; `cancel` is cooperative and returns
/// immediately.
pub trait Transport {
    fn download(&self, jobs: &[DownloadJob], events: &mut dyn TransportEvents);
    fn cancel(&self);
}

/// Builds the downloader for a given content source.
pub trait TransportFactory {
    fn transport_for(&self, source: &ContentSource) -> Result<Box<dyn Transport>, WarehouseError>;
}

/// Blocking HTTP downloader. A batch is transferred in waves of at most
/// `concurrent` scoped threads; events fire on the dispatching thread, started
/// before a wave and outcomes after it joins.
pub struct HttpTransport {
    client: Client,
    concurrent: usize,
    cancelled: AtomicBool,
}

impl HttpTransport {
    pub fn new(concurrent: usize) -> Result<Self, WarehouseError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("content-warehouse/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WarehouseError::TransportInit(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| WarehouseError::TransportInit(err.to_string()))?;
        Ok(Self {
            client,
            concurrent: concurrent.max(1),
            cancelled: AtomicBool::new(false),
        })
    }

    fn transfer(&self, job: &DownloadJob) -> Result<(), String> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err("transfer cancelled".to_string());
        }
        let mut response = self
            .client
            .get(&job.url)
            .send()
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("{} returned status {}", job.url, response.status()));
        }
        if let Some(parent) = job.destination.parent() {
            std::fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        let mut file = File::create(&job.destination).map_err(|err| err.to_string())?;
        std::io::copy(&mut response, &mut file).map_err(|err| err.to_string())?;
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn download(&self, jobs: &[DownloadJob], events: &mut dyn TransportEvents) {
        for wave in jobs.chunks(self.concurrent) {
            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
            for job in wave {
                events.started(job);
            }
            if self.cancelled.load(Ordering::Relaxed) {
                return;
            }
            let results: Vec<Result<(), String>> = thread::scope(|scope| {
                let handles: Vec<_> = wave
                    .iter()
                    .map(|job| scope.spawn(move || self.transfer(job)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err("transfer panicked".to_string()))
                    })
                    .collect()
            });
            for (job, result) in wave.iter().zip(results) {
                match result {
                    Ok(()) => events.succeeded(job),
                    Err(message) => events.failed(job, &message),
                }
            }
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn transport_for(&self, source: &ContentSource) -> Result<Box<dyn Transport>, WarehouseError> {
        let transport = HttpTransport::new(source.max_concurrent().unwrap_or(1)).map_err(|err| {
            WarehouseError::TransportSetup {
                source_id: source.id().as_str().to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(Box::new(transport))
    }
}
