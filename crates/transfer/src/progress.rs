//! Throughput, ETA, and throttled status text for both transfer phases.
//!
//! An update is published when a phase's integer percentage has moved at
//! least [`PUBLISH_STEP`] points since the last update for that phase, or
//! when it first reaches 100%. Phases with an unknown total publish a single
//! "initializing" update instead.

use {
    tokio::{sync::mpsc, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

/// Minimum percentage movement between two published updates of a phase.
pub const PUBLISH_STEP: u8 = 10;

/// Segments in the progress bar.
pub const BAR_SEGMENTS: usize = 10;

/// Shown while the download total is unknown.
pub const INITIALIZING_TEXT: &str = "Initializing download ...";

/// Shown while the upload total is unknown.
pub const INITIALIZING_UPLOAD_TEXT: &str = "Initializing upload ...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Upload,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }

    /// Text published once while this phase's total is unknown.
    #[must_use]
    pub fn initializing_text(self) -> &'static str {
        match self {
            Self::Download => INITIALIZING_TEXT,
            Self::Upload => INITIALIZING_UPLOAD_TEXT,
        }
    }
}

/// A status text ready to be shown to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    /// `None` while the phase total is unknown.
    pub percent: Option<u8>,
    pub text: String,
}

#[derive(Debug, Default)]
struct PhaseState {
    total: u64,
    bytes: u64,
    started: Option<Instant>,
    last_published: u8,
    completed_published: bool,
    initializing_published: bool,
}

impl PhaseState {
    fn percent(&self) -> Option<u8> {
        (self.total > 0).then(|| (self.bytes.saturating_mul(100) / self.total).min(100) as u8)
    }

    /// Bytes per second since the phase started.
    fn throughput(&self, now: Instant) -> f64 {
        let Some(started) = self.started else {
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        if elapsed > 0.0 {
            self.bytes as f64 / elapsed
        } else {
            0.0
        }
    }

    fn line(&self, now: Instant) -> PhaseLine {
        let bytes_per_sec = self.throughput(now);
        let eta_secs = (bytes_per_sec > 0.0)
            .then(|| self.total.saturating_sub(self.bytes) as f64 / bytes_per_sec);
        PhaseLine {
            kb_per_sec: bytes_per_sec / 1024.0,
            eta_secs,
            percent: self.percent().unwrap_or(0),
        }
    }
}

/// Per-phase numbers shown in the status text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseLine {
    pub kb_per_sec: f64,
    pub eta_secs: Option<f64>,
    pub percent: u8,
}

/// Tracks both phases of one job and publishes throttled updates.
#[derive(Debug)]
pub struct ProgressTracker {
    file_name: String,
    download: PhaseState,
    upload: PhaseState,
    updates: mpsc::UnboundedSender<ProgressUpdate>,
    cancel: CancellationToken,
}

impl ProgressTracker {
    /// Start tracking. The download clock starts now.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        download_total: u64,
        updates: mpsc::UnboundedSender<ProgressUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            download: PhaseState {
                total: download_total,
                started: Some(Instant::now()),
                ..PhaseState::default()
            },
            upload: PhaseState::default(),
            updates,
            cancel,
        }
    }

    #[must_use]
    pub fn bytes(&self, phase: Phase) -> u64 {
        self.state(phase).bytes
    }

    #[must_use]
    pub fn total(&self, phase: Phase) -> u64 {
        self.state(phase).total
    }

    /// Set the declared download total once the source is resolved.
    pub fn set_download_total(&mut self, total: u64) {
        self.download.total = total;
    }

    /// Start the upload clock. Only the first call has an effect.
    pub fn begin_upload(&mut self, total: u64) {
        if self.upload.started.is_some() {
            return;
        }
        self.upload = PhaseState {
            total,
            started: Some(Instant::now()),
            ..PhaseState::default()
        };
    }

    /// Pin the download total to what was actually received and publish 100%.
    pub fn finish_download(&mut self, received: u64) {
        self.download.total = received;
        self.record(Phase::Download, received);
    }

    /// Record cumulative bytes for a phase, publishing if the throttle allows.
    ///
    /// Counts never move backwards. A count past a known total raises the
    /// total. No-op once the job is cancelled.
    pub fn record(&mut self, phase: Phase, bytes_so_far: u64) {
        if self.cancel.is_cancelled() {
            return;
        }
        let state = self.state_mut(phase);
        state.bytes = state.bytes.max(bytes_so_far);
        if state.total > 0 && state.bytes > state.total {
            state.total = state.bytes;
        }

        let Some(percent) = state.percent() else {
            if !state.initializing_published {
                state.initializing_published = true;
                self.publish(phase, None, phase.initializing_text().to_string());
            }
            return;
        };

        let reached_end = percent == 100 && !state.completed_published;
        let moved = percent >= state.last_published.saturating_add(PUBLISH_STEP);
        if !(reached_end || moved) {
            return;
        }
        state.last_published = percent;
        if percent == 100 {
            state.completed_published = true;
        }
        let text = self.render(Instant::now());
        self.publish(phase, Some(percent), text);
    }

    /// Current status text.
    #[must_use]
    pub fn render(&self, now: Instant) -> String {
        render_status(
            &self.file_name,
            self.download.total,
            self.download.line(now),
            self.upload.line(now),
        )
    }

    fn publish(&self, phase: Phase, percent: Option<u8>, text: String) {
        debug!(phase = phase.as_str(), ?percent, "progress update");
        // The reporter may already be gone; progress is best effort.
        let _ = self.updates.send(ProgressUpdate {
            phase,
            percent,
            text,
        });
    }

    fn state(&self, phase: Phase) -> &PhaseState {
        match phase {
            Phase::Download => &self.download,
            Phase::Upload => &self.upload,
        }
    }

    fn state_mut(&mut self, phase: Phase) -> &mut PhaseState {
        match phase {
            Phase::Download => &mut self.download,
            Phase::Upload => &mut self.upload,
        }
    }
}

/// Status text shown to the requester.
#[must_use]
pub fn render_status(
    file_name: &str,
    total_bytes: u64,
    download: PhaseLine,
    upload: PhaseLine,
) -> String {
    format!(
        "Filename: `{file_name}`\n\
         File Size: {}\n\
         Download Speed: {:.2} KB/s | Remaining: {}\n\
         Upload Speed: {:.2} KB/s  | Remaining: {}\n\n\
         Download: {} {}%\n\
         Upload: {} {}%",
        human_size(total_bytes),
        download.kb_per_sec,
        format_eta(download.eta_secs),
        upload.kb_per_sec,
        format_eta(upload.eta_secs),
        progress_bar(download.percent),
        download.percent,
        progress_bar(upload.percent),
        upload.percent,
    )
}

/// `"{:.2} seconds"`, or `"N/A"` without throughput.
#[must_use]
pub fn format_eta(eta_secs: Option<f64>) -> String {
    match eta_secs {
        Some(secs) => format!("{secs:.2} seconds"),
        None => "N/A".to_string(),
    }
}

/// Ten-segment block bar, one filled segment per full 10%.
#[must_use]
pub fn progress_bar(percent: u8) -> String {
    let filled = (usize::from(percent.min(100)) / 10).min(BAR_SEGMENTS);
    format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_SEGMENTS - filled)
    )
}

/// `B` below 1 KiB, then KB/MB/GB with two decimals.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.2} KB", b / KIB)
    } else if b < KIB * KIB * KIB {
        format!("{:.2} MB", b / (KIB * KIB))
    } else {
        format!("{:.2} GB", b / (KIB * KIB * KIB))
    }
}
