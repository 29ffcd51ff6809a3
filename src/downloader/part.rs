//! Part Worker
//!
//! Executes one byte-range segment of a segmented HTTP download over a
//! single connection. Progress is published through atomics owned by the
//! worker and read by the task's aggregator; the worker never touches the
//! task record directly.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::SettingsSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::model::record::PartProgress;
use crate::net::watcher::{gate_status, Connectivity};

/// Lifecycle of a single part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PartStatus {
    Pending = 0,
    Downloading = 1,
    Complete = 2,
    Close = 3,
}

impl PartStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PartStatus::Downloading,
            2 => PartStatus::Complete,
            3 => PartStatus::Close,
            _ => PartStatus::Pending,
        }
    }
}

/// Progress cell shared between a worker and the task aggregator.
///
/// `downloaded` and `status` are written only by the owning worker and
/// read by the aggregator; the attempt token lets the completion watchdog
/// stop a stalled attempt without cancelling the whole task.
pub struct PartShared {
    pub index: usize,
    pub start_byte: u64,
    pub end_byte: u64,
    pub chunk_size: u64,
    downloaded: AtomicU64,
    status: AtomicU8,
    attempt: Mutex<CancellationToken>,
}

impl PartShared {
    pub fn from_plan(index: usize, plan: &PartProgress) -> Arc<Self> {
        Arc::new(Self {
            index,
            start_byte: plan.start_byte,
            end_byte: plan.end_byte,
            chunk_size: plan.chunk_size,
            downloaded: AtomicU64::new(plan.downloaded_byte),
            status: AtomicU8::new(PartStatus::Pending as u8),
            attempt: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    pub fn set_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Release);
    }

    fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
    }

    pub fn status(&self) -> PartStatus {
        PartStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: PartStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Whether every byte of the chunk is on disk (known-size parts only).
    pub fn is_filled(&self) -> bool {
        self.chunk_size > 0 && self.downloaded() >= self.chunk_size
    }

    /// Begin a fresh attempt, returning its cancellation token.
    pub fn new_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.attempt.lock().unwrap() = token.clone();
        token
    }

    /// Stop the current attempt (completion watchdog).
    pub fn cancel_attempt(&self) {
        self.attempt.lock().unwrap().cancel();
    }
}

/// Headers carried over from a browser-originated record
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub browser_originated: bool,
    pub referer: Option<String>,
    pub cookie_string: Option<String>,
    pub content_disposition: Option<String>,
    pub additional_headers: HashMap<String, String>,
}

/// Terminal outcome of one worker attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    Completed,
    Cancelled,
    /// The connectivity gate refused the attempt
    GateClosed(&'static str),
}

/// One byte-range worker of a segmented task.
pub struct PartWorker {
    pub shared: Arc<PartShared>,
    client: reqwest::Client,
    url: String,
    file_path: PathBuf,
    settings: SettingsSnapshot,
    request_ctx: RequestContext,
    connectivity: Arc<dyn Connectivity>,
    task_cancel: CancellationToken,
    /// Exactly one part exists for this task
    single_thread: bool,
    supports_resume: bool,
    supports_multipart: bool,
}

impl PartWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: Arc<PartShared>,
        client: reqwest::Client,
        url: String,
        file_path: PathBuf,
        settings: SettingsSnapshot,
        request_ctx: RequestContext,
        connectivity: Arc<dyn Connectivity>,
        task_cancel: CancellationToken,
        single_thread: bool,
        supports_resume: bool,
        supports_multipart: bool,
    ) -> Self {
        Self {
            shared,
            client,
            url,
            file_path,
            settings,
            request_ctx,
            connectivity,
            task_cancel,
            single_thread,
            supports_resume,
            supports_multipart,
        }
    }

    fn cancelled(&self, attempt: &CancellationToken) -> bool {
        self.task_cancel.is_cancelled() || attempt.is_cancelled()
    }

    /// Run one transfer attempt for this part.
    pub async fn run(&self) -> CoreResult<PartOutcome> {
        let attempt = self.shared.new_attempt();

        if self.cancelled(&attempt) {
            self.shared.set_status(PartStatus::Close);
            return Ok(PartOutcome::Cancelled);
        }
        if self.shared.status() == PartStatus::Complete || self.shared.is_filled() {
            self.shared.set_status(PartStatus::Complete);
            return Ok(PartOutcome::Completed);
        }
        if let Some(text) = gate_status(self.connectivity.as_ref(), self.settings.wifi_only) {
            self.shared.set_status(PartStatus::Close);
            return Ok(PartOutcome::GateClosed(text));
        }

        self.shared.set_status(PartStatus::Downloading);
        let result = self.transfer(&attempt).await;
        match &result {
            Ok(PartOutcome::Completed) => self.shared.set_status(PartStatus::Complete),
            Ok(_) | Err(_) => self.shared.set_status(PartStatus::Close),
        }
        result
    }

    async fn transfer(&self, attempt: &CancellationToken) -> CoreResult<PartOutcome> {
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.file_path)
            .await
            .map_err(|e| CoreError::FileAccess {
                path: self.file_path.clone(),
                reason: e.to_string(),
            })?;

        // Servers without resume always restart from zero
        if !self.supports_resume && self.shared.downloaded() > 0 {
            self.shared.set_downloaded(0);
            file.set_len(0).await.map_err(|e| CoreError::FileAccess {
                path: self.file_path.clone(),
                reason: e.to_string(),
            })?;
        }

        let output_pos = self.shared.start_byte + self.shared.downloaded();
        file.seek(SeekFrom::Start(output_pos)).await?;

        let response = self.send_request().await?;
        let status = response.status();

        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            // The remote has nothing left for this range
            if self.shared.is_filled() {
                return Ok(PartOutcome::Completed);
            }
            return Err(CoreError::UrlExpired {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(CoreError::UrlExpired {
                status: status.as_u16(),
            });
        }

        // A 200 on a ranged request means the server ignored the offset
        if output_pos > 0 && status == reqwest::StatusCode::OK {
            if self.single_thread {
                tracing::warn!(
                    "Server ignored Range header for part {}, restarting from zero",
                    self.shared.index
                );
                self.shared.set_downloaded(0);
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
            } else {
                return Err(CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "server ignored range request",
                )));
            }
        }

        let bounded = !self.single_thread && self.shared.chunk_size > 0;
        let buffer_size = self.settings.buffer_size.max(1);
        let max_bps = self.settings.max_network_bps;
        let started = Instant::now();
        let mut fetched: u64 = 0;

        let mut stream = response.bytes_stream();
        'transfer: loop {
            if self.cancelled(attempt) {
                // Bytes of earlier iterations are already committed
                file.flush().await?;
                return Ok(PartOutcome::Cancelled);
            }

            // Read deadline per iteration; expiry flows into the retry
            // policy as a transient fault
            let next = match tokio::time::timeout(self.settings.http_timeout(), stream.next()).await
            {
                Ok(next) => next,
                Err(_) => {
                    file.flush().await?;
                    return Err(CoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "read timed out",
                    )));
                }
            };
            let Some(next) = next else {
                break;
            };
            let chunk = next?;

            // Consume at most buffer_size bytes per iteration so the
            // throttle paces at buffer granularity
            for piece in chunk.chunks(buffer_size) {
                fetched += piece.len() as u64;

                // Speed limit: sleep off the time the bytes should have taken
                if max_bps > 0 {
                    let expected_ms = fetched.saturating_mul(1000) / max_bps;
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if elapsed_ms < expected_ms {
                        tokio::time::sleep(Duration::from_millis(expected_ms - elapsed_ms)).await;
                    }
                }

                let write_len = if bounded {
                    let remaining = self
                        .shared
                        .chunk_size
                        .saturating_sub(self.shared.downloaded());
                    (piece.len() as u64).min(remaining) as usize
                } else {
                    piece.len()
                };
                if write_len > 0 {
                    file.write_all(&piece[..write_len]).await?;
                    self.shared.add_downloaded(write_len as u64);
                }

                if bounded && self.shared.is_filled() {
                    break 'transfer;
                }
            }
        }
        file.flush().await?;

        if bounded && !self.shared.is_filled() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended before the range was filled",
            )));
        }
        if !self.file_path.exists() {
            return Err(CoreError::DestinationMissing(self.file_path.clone()));
        }

        Ok(PartOutcome::Completed)
    }

    async fn send_request(&self) -> CoreResult<reqwest::Response> {
        use reqwest::header;

        // No whole-request deadline: a healthy transfer may legitimately
        // run for hours. Connect timeout lives on the client; the read
        // deadline wraps each stream iteration.
        let mut request = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "*/*")
            .header(header::RANGE, self.range_value())
            .header(header::USER_AGENT, self.settings.effective_user_agent());

        if self.request_ctx.browser_originated {
            if let Some(host) = reqwest::Url::parse(&self.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
            {
                request = request.header(header::HOST, host);
            }
            if let Some(referer) = self
                .request_ctx
                .referer
                .as_deref()
                .and_then(normalize_referer)
            {
                request = request.header(header::REFERER, referer);
            }
            if let Some(cd) = &self.request_ctx.content_disposition {
                request = request.header(header::CONTENT_DISPOSITION, cd);
            }
            if let Some(cookie) = &self.request_ctx.cookie_string {
                request = request.header(header::COOKIE, cookie);
            }
            request = request
                .header("Sec-Fetch-Dest", "document")
                .header("Sec-Fetch-Mode", "navigate")
                .header("Sec-Fetch-Site", "same-origin")
                .header("Sec-Fetch-User", "?1");
        }
        for (name, value) in &self.request_ctx.additional_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::time::timeout(self.settings.http_timeout(), request.send())
            .await
            .map_err(|_| {
                CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "request timed out",
                ))
            })??;
        Ok(response)
    }

    /// Range grammar per transfer mode: bounded for multipart, open-ended
    /// for single-thread, open-ended from the absolute offset when the
    /// server lacks multipart but more than one part was planned.
    fn range_value(&self) -> String {
        let downloaded = self.shared.downloaded();
        if self.single_thread {
            format!("bytes={}-", downloaded)
        } else if self.supports_multipart {
            format!(
                "bytes={}-{}",
                self.shared.start_byte + downloaded,
                self.shared.end_byte
            )
        } else {
            format!("bytes={}-", self.shared.start_byte + downloaded)
        }
    }
}

/// Reduce a referer to its origin (`scheme://host/`).
fn normalize_referer(referer: &str) -> Option<String> {
    let url = reqwest::Url::parse(referer).ok()?;
    let host = url.host_str()?;
    Some(format!("{}://{}/", url.scheme(), host))
}
