//! Transfer pipeline: resolve a source, download it with progress, watermark,
//! and deliver the result in one piece or in batches of chunks.
//!
//! Every stage polls the job's cancellation token and stops writing to the
//! destination once it fires.

pub mod delivery;
pub mod error;
pub mod http;
pub mod job;
pub mod pipeline;
pub mod plan;
pub mod prefs;
pub mod progress;
pub mod reporter;
pub mod source;

pub use {
    delivery::{
        Attachment, Controls, DeliveryLimits, DeliveryManager, DeliveryReport, DestinationChannel,
        MessageHandle,
    },
    error::{Error, Result},
    http::ReqwestFetcher,
    job::{JobOutcome, JobRegistry, JobStatus, TransferJob},
    pipeline::TransferPipeline,
    plan::ChunkPlan,
    prefs::{PreferenceStore, RequesterId, WatermarkField},
    progress::{Phase, ProgressTracker, ProgressUpdate},
    reporter::ProgressReporter,
    source::{ByteStream, HttpFetch, ObjectStore, ProbeInfo, RemoteObject, SourceResolver},
};
