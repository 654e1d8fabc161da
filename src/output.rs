use std::io::{self, Write};

use serde::Serialize;

use crate::request::Request;
use crate::warehouse::RefreshReport;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub reports: Vec<RefreshReport>,
    pub catalog_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItemResult>,
    pub downloaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItemResult {
    pub unit: String,
    pub destination: String,
    pub downloaded: bool,
    pub attempts: usize,
    pub errors: Vec<String>,
}

impl DownloadResult {
    pub fn from_requests(requests: &[Request]) -> Self {
        let items: Vec<DownloadItemResult> = requests
            .iter()
            .map(|request| DownloadItemResult {
                unit: request.unit_key().to_string(),
                destination: request.destination().display().to_string(),
                downloaded: request.downloaded(),
                attempts: if request.downloaded() {
                    request.errors().len() + 1
                } else {
                    request.errors().len()
                },
                errors: request.errors().to_vec(),
            })
            .collect();
        let downloaded = items.iter().filter(|item| item.downloaded).count();
        let failed = items.len() - downloaded;
        Self {
            items,
            downloaded,
            failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeResult {
    pub entries_before: usize,
    pub entries_after: usize,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_refresh(result: &RefreshResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_purge(result: &PurgeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
