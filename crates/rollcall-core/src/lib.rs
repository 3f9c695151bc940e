//! rollcall-core — Face enrollment, recognition and attendance bookkeeping.
//!
//! The encoding store and attendance ledger are flat files. Detection and
//! embedding extraction sit behind [`FaceBackend`]; [`OnnxBackend`] runs
//! SCRFD and ArcFace on ONNX Runtime.

pub mod annotate;
pub mod backend;
pub mod detector;
pub mod encoder;
pub mod enroll;
pub mod ledger;
pub mod matcher;
pub mod onnx;
pub mod persist;
pub mod recognize;
pub mod session;
pub mod store;
pub mod types;

pub use annotate::{Annotator, Canvas};
pub use backend::FaceBackend;
pub use enroll::EnrollError;
pub use ledger::{AttendanceLedger, AttendanceTable, LedgerError};
pub use matcher::{EuclideanMatcher, Matcher};
pub use onnx::OnnxBackend;
pub use session::{
    FrameSource, Presenter, QuitSignal, Session, SessionAborted, SessionError, SessionOptions, SessionSummary,
};
pub use store::{EncodingStore, StoreError};
pub use types::{Embedding, FaceLocation, KnownFace, MatchResult, RecognizedFace, UNKNOWN_LABEL};
