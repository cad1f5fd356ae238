//! Telltale - Per-channel behavioral anomaly and episode detection
//!
//! Telltale turns a recorded session of facial, vocal and verbal measurements
//! into per-frame channel states through a deterministic pipeline:
//! speaker gating → signal transformation → streaming anomaly scoring →
//! distribution calibration → episode merging → record assembly.
//!
//! ## Modules
//!
//! - **Transform**: Facial, vocal and verbal signal transforms
//! - **Forest**: Robust random cut forest scorer
//! - **Calibrator**: Shape-adaptive robust thresholding
//! - **Episodes / Speaker**: Bounded-gap episode merging and speaker gating
//! - **Pipeline**: Single-channel and whole-session processing
//! - **Summary**: Windowed anomaly reports

pub mod assembler;
pub mod calibrator;
pub mod config;
pub mod episodes;
pub mod error;
pub mod forest;
pub mod pipeline;
pub mod speaker;
pub mod summary;
pub mod transform;
pub mod types;

pub use config::{PipelineConfig, ProcessingMode};
pub use error::DetectError;
pub use pipeline::{
    session_to_states, ChannelPipeline, SessionEvaluation, SessionOutput, SessionProcessor,
    SessionValues,
};
pub use summary::{SummaryEncoder, WindowSummarizer};
pub use types::{Channel, ChannelRecord, ChannelStates, Episode, Session};

/// Telltale version embedded in summary payloads
pub const TELLTALE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for summary payloads
pub const PRODUCER_NAME: &str = "telltale";
