//! Streaming media transfer.
//!
//! Opens the resolved media URL, checks the response headers before any body
//! byte is handed out, then streams chunks while tracking progress. A declared
//! `Content-Length` below the expected kind's minimum size fails up front;
//! otherwise the payload is checked against that minimum once the body ends,
//! and only then is the transfer complete.
//!
//! Two ways to consume a [`Transfer`]:
//! - [`Transfer::collect`]: one contiguous buffer after validation
//! - [`Transfer::into_stream`]: chunks as they arrive, with a terminal error
//!   item when validation fails (the caller must discard what it received)

pub mod progress;

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::http_client::{header_content_length, header_content_type, MediaClient};
use crate::media::{is_media_type, ContentKind};

pub use progress::{
    percent_for, ProgressCallback, ProgressReporter, TransferProgress, TransferState,
};

/// Body chunks as they come off the wire.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Largest buffer pre-allocated by [`Transfer::collect`] from a declared length.
const MAX_PREALLOCATE: u64 = 64 * 1024 * 1024;

/// Bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    request_id: Uuid,
    total_bytes_expected: Option<u64>,
    bytes_received: u64,
    state: TransferState,
    kind: ContentKind,
}

impl TransferSession {
    #[must_use]
    pub fn new(request_id: Uuid, kind: ContentKind) -> Self {
        Self {
            request_id,
            total_bytes_expected: None,
            bytes_received: 0,
            state: TransferState::Pending,
            kind,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn total_bytes_expected(&self) -> Option<u64> {
        self.total_bytes_expected
    }

    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    #[must_use]
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Move to `next` if that is a forward transition. Returns whether it was.
    pub fn advance(&mut self, next: TransferState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    fn record(&mut self, chunk_len: usize) {
        self.bytes_received = self.bytes_received.saturating_add(chunk_len as u64);
    }

    fn snapshot(&self, percent: u8) -> TransferProgress {
        TransferProgress {
            percent,
            bytes_received: self.bytes_received,
            total_bytes: self.total_bytes_expected,
            state: self.state,
        }
    }
}

/// Status line and headers of a media response.
#[derive(Debug, Clone)]
pub struct TransferHead {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// Per-transfer settings.
pub struct TransferOptions {
    pub request_id: Uuid,
    /// What the caller expects to receive.
    pub expected: ContentKind,
    /// Wall-clock bound on the whole transfer.
    pub timeout: Duration,
    pub deadline: Instant,
    pub progress_interval: Duration,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl TransferOptions {
    #[must_use]
    pub fn new(request_id: Uuid, expected: ContentKind, timeout: Duration) -> Self {
        Self {
            request_id,
            expected,
            timeout,
            deadline: Instant::now() + timeout,
            progress_interval: Duration::from_millis(250),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Opens media transfers with a shared client.
pub struct TransferManager {
    client: Arc<MediaClient>,
    timeout: Duration,
    progress_interval: Duration,
}

impl TransferManager {
    #[must_use]
    pub fn new(client: Arc<MediaClient>, config: &TransferConfig) -> Self {
        Self {
            client,
            timeout: config.timeout(),
            progress_interval: config.progress_interval(),
        }
    }

    /// Default options for a transfer started now.
    #[must_use]
    pub fn options(&self, request_id: Uuid, expected: ContentKind) -> TransferOptions {
        TransferOptions::new(request_id, expected, self.timeout)
            .with_progress_interval(self.progress_interval)
    }

    /// Send the request and validate the response headers.
    ///
    /// Nothing of the body has been read when this returns.
    #[instrument(skip(self, referer, options), fields(request_id = %options.request_id, url = %url))]
    pub async fn open(
        &self,
        url: &Url,
        referer: Option<&str>,
        options: TransferOptions,
    ) -> Result<Transfer> {
        if let Some(callback) = &options.progress {
            callback(TransferSession::new(options.request_id, options.expected).snapshot(0));
        }

        let request = self.client.media_get(url, referer).send();
        let response = tokio::select! {
            biased;
            () = options.cancel.cancelled() => return Err(Error::Cancelled),
            sent = tokio::time::timeout_at(options.deadline, request) => match sent {
                Err(_) => return Err(Error::TransferTimeout(options.timeout)),
                Ok(response) => response?,
            },
        };

        let head = TransferHead {
            status: response.status().as_u16(),
            content_type: header_content_type(response.headers()),
            content_length: header_content_length(response.headers()),
        };
        info!(
            status = head.status,
            content_type = ?head.content_type,
            content_length = ?head.content_length,
            "Media response received"
        );

        let body = response.bytes_stream().map(|r| r.map_err(Error::from)).boxed();
        Transfer::from_parts(head, body, options)
    }
}

/// A transfer whose headers have been accepted.
pub struct Transfer {
    session: TransferSession,
    content_type: String,
    body: ChunkStream,
    reporter: ProgressReporter,
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Transfer {
    /// Validate `head` and prepare to stream `body`.
    ///
    /// Rejects error statuses, content types the expected kind rules out, and
    /// declared lengths below the kind's minimum size, before any chunk is
    /// read.
    pub fn from_parts(
        head: TransferHead,
        body: ChunkStream,
        options: TransferOptions,
    ) -> Result<Self> {
        let TransferOptions {
            request_id,
            expected,
            timeout,
            deadline,
            progress_interval,
            cancel,
            progress,
        } = options;

        if !(200..300).contains(&head.status) {
            warn!(status = head.status, "Media host refused the transfer");
            return Err(Error::UpstreamStatus {
                status: head.status,
            });
        }

        let declared = head.content_type.clone().unwrap_or_default();
        if expected.rejects(&declared) {
            return Err(Error::UnsupportedContentType {
                content_type: declared,
                expected,
            });
        }

        // The declared type, when it is media, is more precise than the guess
        // made during extraction.
        let kind = if is_media_type(&declared) {
            ContentKind::from_mime(&declared)
        } else {
            if !declared.is_empty() && expected.is_media() {
                warn!(content_type = %declared, %expected, "Unexpected content type");
            }
            expected
        };

        let content_type = if declared.is_empty() {
            kind.default_mime().to_string()
        } else {
            declared
        };

        // Once headers are forwarded a caller cannot be told the body was bad,
        // so a declared length that already misses the floor fails here.
        if let Some(declared_length) = head.content_length {
            let minimum = kind.min_payload_bytes();
            if declared_length < minimum {
                warn!(declared_length, minimum, %kind, "Declared length below floor");
                return Err(Error::SuspiciouslySmallPayload {
                    received: declared_length,
                    minimum,
                    kind,
                });
            }
        }

        let mut session = TransferSession::new(request_id, kind);
        session.total_bytes_expected = head.content_length;
        session.advance(TransferState::Streaming);

        let mut reporter = ProgressReporter::new(progress, progress_interval);
        reporter.milestone(session.snapshot(progress::HEADERS_ACCEPTED_PERCENT));

        Ok(Self {
            session,
            content_type,
            body,
            reporter,
            deadline,
            timeout,
            cancel,
        })
    }

    /// Content type to advertise downstream.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Declared body length, if the host sent one.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.session.total_bytes_expected
    }

    #[must_use]
    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    fn fail(&mut self, err: Error) -> Error {
        if self.session.advance(TransferState::Failed) {
            warn!(
                request_id = %self.session.request_id,
                bytes = self.session.bytes_received,
                error = %err,
                "Transfer failed"
            );
            self.reporter
                .milestone(self.session.snapshot(self.reporter.last_percent()));
        }
        err
    }

    fn validate(&mut self) -> Result<()> {
        if self.session.advance(TransferState::Validating) {
            let percent = percent_for(
                self.session.bytes_received,
                self.session.total_bytes_expected,
                self.session.kind,
            );
            self.reporter.milestone(self.session.snapshot(percent));
        }
        let received = self.session.bytes_received;
        let minimum = self.session.kind.min_payload_bytes();
        if received == 0 || received < minimum {
            return Err(Error::SuspiciouslySmallPayload {
                received,
                minimum,
                kind: self.session.kind,
            });
        }
        Ok(())
    }

    /// Next body chunk.
    ///
    /// Returns `None` once the transfer has completed or failed. A failure is
    /// yielded exactly once, as `Some(Err(_))`.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        if self.session.state.is_terminal() {
            return None;
        }

        let next = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Some(Err(self.fail(Error::Cancelled))),
            next = tokio::time::timeout_at(self.deadline, self.body.next()) => next,
        };

        match next {
            Err(_) => Some(Err(self.fail(Error::TransferTimeout(self.timeout)))),
            Ok(Some(Err(e))) => Some(Err(self.fail(e))),
            Ok(Some(Ok(chunk))) => {
                self.session.record(chunk.len());
                let percent = percent_for(
                    self.session.bytes_received,
                    self.session.total_bytes_expected,
                    self.session.kind,
                );
                self.reporter.update(self.session.snapshot(percent));
                Some(Ok(chunk))
            }
            Ok(None) => match self.validate() {
                Ok(()) => {
                    self.session.advance(TransferState::Completed);
                    self.reporter.milestone(self.session.snapshot(100));
                    info!(
                        request_id = %self.session.request_id,
                        bytes = self.session.bytes_received,
                        "Transfer completed"
                    );
                    None
                }
                Err(e) => Some(Err(self.fail(e))),
            },
        }
    }

    /// Read the whole body into one buffer.
    pub async fn collect(mut self) -> Result<Bytes> {
        let capacity = self
            .session
            .total_bytes_expected
            .unwrap_or(0)
            .min(MAX_PREALLOCATE);
        let mut buffer = BytesMut::with_capacity(usize::try_from(capacity).unwrap_or(0));
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        debug!(bytes = buffer.len(), "Collected transfer");
        Ok(buffer.freeze())
    }

    /// Hand chunks to the caller as they arrive.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::unfold(self, |mut transfer| async move {
            let item = transfer.next_chunk().await?;
            Some((item, transfer))
        })
    }
}
