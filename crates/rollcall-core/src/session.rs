//! Live recognition loop.
//!
//! A single control thread pulls a frame, analyzes every Nth one, draws the
//! latest overlay, hands the frame to the presenter and polls for quit.
//! Skipped frames reuse the previous overlay, so boxes can trail the true
//! face position by one frame.

use crate::annotate::Annotator;
use crate::backend::FaceBackend;
use crate::matcher::Matcher;
use crate::recognize::{detect_faces, downscale, label_faces};
use crate::types::{KnownFace, RecognizedFace};
use image::RgbImage;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Default amortization: analyze every second frame.
pub const DEFAULT_PROCESS_EVERY: u32 = 2;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame source: {0}")]
    Source(#[source] BoxError),
    #[error("face backend: {0}")]
    Backend(#[source] BoxError),
    #[error("presenting frame: {0}")]
    Present(#[source] BoxError),
    #[error("backend produces {actual}-dimensional embeddings, the store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A session that stopped on an error, with what it saw before stopping.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct SessionAborted {
    pub summary: SessionSummary,
    #[source]
    pub error: SessionError,
}

/// Supplier of full-resolution frames. May block until a frame is ready.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

/// Consumer of annotated frames (preview file, window, nothing).
pub trait Presenter {
    fn present(&mut self, frame: &RgbImage) -> Result<(), BoxError>;
}

/// Discards frames.
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _frame: &RgbImage) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Cooperative quit flag, polled once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct QuitSignal(Arc<AtomicBool>);

impl QuitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub threshold: f32,
    /// Analyze one frame out of this many (at least 1).
    pub process_every: u32,
    /// Analysis frames are the display frame shrunk by this factor.
    pub downscale: u32,
}

/// What a session saw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    /// Identities recognized at least once, "Unknown" excluded.
    pub recognized: BTreeSet<String>,
    pub frames: u64,
    pub analyzed: u64,
}

pub struct Session<'a, B, M: ?Sized> {
    backend: B,
    matcher: &'a M,
    gallery: &'a [KnownFace],
    options: SessionOptions,
    annotator: Annotator,
}

impl<'a, B, M> Session<'a, B, M>
where
    B: FaceBackend,
    M: Matcher + ?Sized,
{
    pub fn new(backend: B, matcher: &'a M, gallery: &'a [KnownFace], options: SessionOptions) -> Self {
        Self {
            backend,
            matcher,
            gallery,
            annotator: Annotator::new(options.downscale),
            options,
        }
    }

    /// Run until the source ends or `quit` is triggered.
    ///
    /// On error the summary gathered so far travels with the error.
    pub fn run<S, P>(&mut self, source: &mut S, presenter: &mut P, quit: &QuitSignal) -> Result<SessionSummary, SessionAborted>
    where
        S: FrameSource,
        P: Presenter + ?Sized,
    {
        let mut summary = SessionSummary::default();
        tracing::info!(
            gallery = self.gallery.len(),
            threshold = self.options.threshold,
            process_every = self.options.process_every.max(1),
            downscale = self.annotator.scale(),
            "session started"
        );

        let outcome = self.run_frames(source, presenter, quit, &mut summary);

        tracing::info!(
            frames = summary.frames,
            analyzed = summary.analyzed,
            recognized = summary.recognized.len(),
            failed = outcome.is_err(),
            "session ended"
        );
        match outcome {
            Ok(()) => Ok(summary),
            Err(error) => Err(SessionAborted { summary, error }),
        }
    }

    fn run_frames<S, P>(
        &mut self,
        source: &mut S,
        presenter: &mut P,
        quit: &QuitSignal,
        summary: &mut SessionSummary,
    ) -> Result<(), SessionError>
    where
        S: FrameSource,
        P: Presenter + ?Sized,
    {
        let every = u64::from(self.options.process_every.max(1));
        let expected_dims = self.gallery.first().map(|k| k.embedding.len());
        let mut dims_checked = false;
        let mut overlay: Vec<RecognizedFace> = Vec::new();

        while !quit.is_triggered() {
            let Some(mut frame) = source
                .next_frame()
                .map_err(|e| SessionError::Source(Box::new(e)))?
            else {
                tracing::info!("frame source exhausted");
                break;
            };

            if summary.frames % every == 0 {
                let small = downscale(&frame, self.annotator.scale());
                let faces = detect_faces(&mut self.backend, &small).map_err(|e| SessionError::Backend(Box::new(e)))?;

                // The first probe decides whether this backend can use the store.
                if let (false, Some(expected), Some(face)) = (dims_checked, expected_dims, faces.first()) {
                    let actual = face.embedding.len();
                    if actual != expected {
                        return Err(SessionError::DimensionMismatch { expected, actual });
                    }
                    dims_checked = true;
                }

                overlay = label_faces(self.matcher, self.gallery, self.options.threshold, faces);
                summary.analyzed += 1;

                for face in overlay.iter().filter(|f| !f.is_unknown()) {
                    if summary.recognized.insert(face.label.clone()) {
                        tracing::info!(name = %face.label, frame = summary.frames, "identity recognized");
                    }
                }
            }
            summary.frames += 1;

            // RgbImage drawing cannot fail.
            let _ = self.annotator.annotate(&mut frame, &overlay);
            presenter.present(&frame).map_err(SessionError::Present)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;
    use crate::matcher::EuclideanMatcher;
    use crate::types::{Embedding, FaceLocation};

    struct Frames {
        remaining: usize,
        quit_after: Option<(usize, QuitSignal)>,
        fail_after: Option<usize>,
        served: usize,
    }

    impl Frames {
        fn new(n: usize) -> Self {
            Self { remaining: n, quit_after: None, fail_after: None, served: 0 }
        }
    }

    #[derive(Debug, Error)]
    #[error("dequeue failed")]
    struct DequeueFailed;

    impl FrameSource for Frames {
        type Error = DequeueFailed;

        fn next_frame(&mut self) -> Result<Option<RgbImage>, DequeueFailed> {
            if self.fail_after == Some(self.served) {
                return Err(DequeueFailed);
            }
            if let Some((n, quit)) = &self.quit_after {
                if self.served == *n {
                    quit.trigger();
                }
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.served += 1;
            Ok(Some(RgbImage::new(64, 64)))
        }
    }

    #[derive(Default)]
    struct Counting(usize);

    impl Presenter for Counting {
        fn present(&mut self, _frame: &RgbImage) -> Result<(), BoxError> {
            self.0 += 1;
            Ok(())
        }
    }

    fn loc() -> FaceLocation {
        FaceLocation { top: 1, right: 5, bottom: 5, left: 1 }
    }

    fn gallery() -> Vec<KnownFace> {
        vec![
            KnownFace { name: "Alice".into(), embedding: Embedding::new(vec![1.0, 0.0]) },
            KnownFace { name: "Bob".into(), embedding: Embedding::new(vec![0.0, 1.0]) },
        ]
    }

    fn options() -> SessionOptions {
        SessionOptions { threshold: 0.6, process_every: 2, downscale: 4 }
    }

    #[test]
    fn test_analyzes_every_other_frame() {
        let gallery = gallery();
        let backend = FakeBackend::default();
        let mut session = Session::new(backend, &EuclideanMatcher, &gallery, options());
        let mut presenter = Counting::default();

        let summary = session.run(&mut Frames::new(5), &mut presenter, &QuitSignal::new()).unwrap();

        assert_eq!(summary.frames, 5);
        assert_eq!(summary.analyzed, 3);
        assert_eq!(session.backend.locate_calls, 3);
        assert_eq!(presenter.0, 5);
    }

    #[test]
    fn test_accumulates_known_names_only() {
        let gallery = gallery();
        let backend = FakeBackend::with_frames(vec![
            vec![(loc(), Embedding::new(vec![0.98, 0.0]))],
            vec![(loc(), Embedding::new(vec![-5.0, -5.0]))],
            vec![(loc(), Embedding::new(vec![0.0, 1.02]))],
        ]);
        let mut session = Session::new(backend, &EuclideanMatcher, &gallery, options());

        let summary = session.run(&mut Frames::new(6), &mut NullPresenter, &QuitSignal::new()).unwrap();

        let expected: BTreeSet<String> = ["Alice", "Bob"].iter().map(|s| s.to_string()).collect();
        assert_eq!(summary.recognized, expected);
    }

    #[test]
    fn test_quit_signal_stops_loop() {
        let gallery = gallery();
        let quit = QuitSignal::new();
        let mut frames = Frames::new(100);
        frames.quit_after = Some((3, quit.clone()));
        let mut session = Session::new(FakeBackend::default(), &EuclideanMatcher, &gallery, options());

        let summary = session.run(&mut frames, &mut NullPresenter, &quit).unwrap();
        // The fourth pull fires the signal; its frame is still shown before the poll.
        assert_eq!(summary.frames, 4);
    }

    #[test]
    fn test_pre_triggered_quit_runs_nothing() {
        let gallery = gallery();
        let quit = QuitSignal::new();
        quit.trigger();
        let mut session = Session::new(FakeBackend::default(), &EuclideanMatcher, &gallery, options());
        let summary = session.run(&mut Frames::new(10), &mut NullPresenter, &quit).unwrap();
        assert_eq!(summary, SessionSummary::default());
    }

    #[test]
    fn test_process_every_zero_treated_as_one() {
        let gallery = gallery();
        let opts = SessionOptions { process_every: 0, ..options() };
        let mut session = Session::new(FakeBackend::default(), &EuclideanMatcher, &gallery, opts);
        let summary = session.run(&mut Frames::new(3), &mut NullPresenter, &QuitSignal::new()).unwrap();
        assert_eq!(summary.analyzed, 3);
    }

    #[test]
    fn test_source_error_keeps_names_seen_so_far() {
        let gallery = gallery();
        let backend = FakeBackend::with_frames(vec![vec![(loc(), Embedding::new(vec![0.98, 0.0]))]]);
        let mut frames = Frames::new(10);
        frames.fail_after = Some(3);
        let mut session = Session::new(backend, &EuclideanMatcher, &gallery, options());

        let aborted = session.run(&mut frames, &mut NullPresenter, &QuitSignal::new()).unwrap_err();

        assert!(matches!(aborted.error, SessionError::Source(_)));
        assert_eq!(aborted.summary.frames, 3);
        assert!(aborted.summary.recognized.contains("Alice"));
    }

    #[test]
    fn test_backend_dimension_mismatch_stops_session() {
        let gallery = gallery();
        let backend = FakeBackend::with_frames(vec![vec![(loc(), Embedding::new(vec![1.0, 0.0, 5.0, 5.0]))]]);
        let mut session = Session::new(backend, &EuclideanMatcher, &gallery, options());

        let aborted = session.run(&mut Frames::new(4), &mut NullPresenter, &QuitSignal::new()).unwrap_err();

        assert!(matches!(
            aborted.error,
            SessionError::DimensionMismatch { expected: 2, actual: 4 }
        ));
        assert!(aborted.summary.recognized.is_empty());
    }
}
