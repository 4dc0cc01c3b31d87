use std::path::PathBuf;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{StudioError, BUSY_MESSAGE, MISSING_INPUTS_MESSAGE};
use crate::llm::{ImageSynthesizer, StyleAnalyzer};
use crate::media::{encode_file, PreviewRegistry, UploadedImage};
use crate::utils::timing::OperationTimer;

pub const GENERATED_MIME_TYPE: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Analyzing,
    Generating,
}

impl SessionStatus {
    pub fn button_label(self) -> &'static str {
        match self {
            SessionStatus::Analyzing => "Analyzing Style...",
            SessionStatus::Generating => "Generating Image...",
            SessionStatus::Idle => "Generate Image",
        }
    }
}

/// One synthesis result. `id` is a millisecond timestamp, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub id: i64,
    pub data_base64: String,
}

impl GeneratedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", GENERATED_MIME_TYPE, self.data_base64)
    }

    #[allow(dead_code)]
    pub fn bytes(&self) -> Result<Vec<u8>, StudioError> {
        general_purpose::STANDARD
            .decode(&self.data_base64)
            .map_err(|err| StudioError::Service(format!("Generated image is not valid base64: {err}")))
    }
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    operations: u64,
    status_owner: u64,
    target_generation: u64,
    user_generation: u64,
    target: Option<UploadedImage>,
    user: Option<UploadedImage>,
    style_description: Option<String>,
    generated: Option<Arc<GeneratedImage>>,
    history: Vec<Arc<GeneratedImage>>,
    error: Option<String>,
    last_image_id: i64,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            status: SessionStatus::Idle,
            operations: 0,
            status_owner: 0,
            target_generation: 0,
            user_generation: 0,
            target: None,
            user: None,
            style_description: None,
            generated: None,
            history: Vec::new(),
            error: None,
            last_image_id: 0,
        }
    }

    fn begin(&mut self, status: SessionStatus) -> u64 {
        self.operations += 1;
        self.status = status;
        self.status_owner = self.operations;
        self.operations
    }

    /// Returns to Idle if `operation` still owns the status.
    fn finish(&mut self, operation: u64) {
        if self.status_owner == operation {
            self.status = SessionStatus::Idle;
        }
    }

    fn inputs(&self) -> InputGenerations {
        InputGenerations {
            target: self.target_generation,
            user: self.user_generation,
        }
    }

    fn next_image_id(&mut self) -> i64 {
        let id = Utc::now().timestamp_millis().max(self.last_image_id + 1);
        self.last_image_id = id;
        id
    }
}

/// Upload counters captured when an operation starts. The style description depends on
/// the target only; a generated image depends on both inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputGenerations {
    target: u64,
    user: u64,
}

/// Read-only view of the session handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub target_preview: Option<Url>,
    pub user_preview: Option<Url>,
    pub style_description: Option<String>,
    pub generated: Option<Arc<GeneratedImage>>,
    pub history: Vec<Arc<GeneratedImage>>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn can_generate(&self) -> bool {
        self.style_description.is_some()
            && self.user_preview.is_some()
            && self.status == SessionStatus::Idle
    }

    pub fn button_label(&self) -> &'static str {
        self.status.button_label()
    }
}

/// Upload, analyze, generate state machine.
///
/// The lock is only held for bookkeeping, never across a remote call, so uploads can
/// arrive while a request is outstanding. Each upload bumps the generation of its own
/// input; a result whose inputs were superseded is returned to the caller but never
/// written into the session.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    previews: PreviewRegistry,
    analyzer: Arc<dyn StyleAnalyzer>,
    synthesizer: Arc<dyn ImageSynthesizer>,
}

impl Session {
    pub fn new(analyzer: Arc<dyn StyleAnalyzer>, synthesizer: Arc<dyn ImageSynthesizer>) -> Self {
        Session {
            state: Arc::new(Mutex::new(SessionState::new())),
            previews: PreviewRegistry::new(),
            analyzer,
            synthesizer,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            status: state.status,
            target_preview: state.target.as_ref().map(|image| image.preview_uri().clone()),
            user_preview: state.user.as_ref().map(|image| image.preview_uri().clone()),
            style_description: state.style_description.clone(),
            generated: state.generated.clone(),
            history: state.history.clone(),
            error: state.error.clone(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    #[allow(dead_code)]
    pub fn live_previews(&self) -> usize {
        self.previews.live_count()
    }

    #[allow(dead_code)]
    pub fn history_item(&self, id: i64) -> Option<Arc<GeneratedImage>> {
        self.state
            .lock()
            .history
            .iter()
            .find(|image| image.id == id)
            .cloned()
    }

    /// Stores the target image and runs style analysis on it.
    pub async fn upload_target(&self, path: impl Into<PathBuf>) -> Result<(), StudioError> {
        let image = self.accept_upload(path.into())?;
        let source = image.path.clone();
        let mime_type = image.mime_type.clone();

        let (operation, generation) = {
            let mut state = self.state.lock();
            state.target = Some(image);
            state.error = None;
            state.style_description = None;
            state.generated = None;
            state.target_generation += 1;
            (state.begin(SessionStatus::Analyzing), state.target_generation)
        };
        info!(
            "Analyzing target {} ({}) generation={}",
            source.display(),
            mime_type,
            generation
        );

        let mut timer = OperationTimer::start(
            "analyze",
            operation,
            Some(source.display().to_string()),
        );
        let result = match encode_file(&source).await {
            Ok(encoded) => self.analyzer.analyze_style(&encoded, &mime_type).await,
            Err(err) => Err(err),
        };

        let mut state = self.state.lock();
        state.finish(operation);
        if state.target_generation != generation {
            debug!(
                "Discarding analysis for target generation {} (session is at {})",
                generation, state.target_generation
            );
            timer.complete("discarded", None);
            return result.map(|_| ());
        }

        match result {
            Ok(description) => {
                info!("Style analysis complete ({} chars)", description.chars().count());
                state.style_description = Some(description);
                timer.complete("success", None);
                Ok(())
            }
            Err(err) => {
                error!("Style analysis failed: {}", err);
                state.error = Some(err.to_string());
                timer.complete(err.kind(), Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Stores the user image. No remote call is made.
    pub fn upload_user(&self, path: impl Into<PathBuf>) -> Result<(), StudioError> {
        let image = self.accept_upload(path.into())?;
        info!("User image set to {} ({})", image.path.display(), image.mime_type);

        let mut state = self.state.lock();
        state.user = Some(image);
        state.generated = None;
        state.user_generation += 1;
        Ok(())
    }

    /// Re-renders the user image in the analyzed style and prepends the result to history.
    pub async fn generate(&self) -> Result<Arc<GeneratedImage>, StudioError> {
        let (operation, inputs, source, mime_type, style) = {
            let mut state = self.state.lock();
            let ready = match (&state.style_description, &state.user) {
                (Some(style), Some(user)) => {
                    Some((style.clone(), user.path.clone(), user.mime_type.clone()))
                }
                _ => None,
            };
            let Some((style, source, mime_type)) = ready else {
                state.error = Some(MISSING_INPUTS_MESSAGE.to_string());
                return Err(StudioError::Validation(MISSING_INPUTS_MESSAGE.to_string()));
            };
            if state.status != SessionStatus::Idle {
                state.error = Some(BUSY_MESSAGE.to_string());
                return Err(StudioError::Validation(BUSY_MESSAGE.to_string()));
            }
            state.error = None;
            state.generated = None;
            let operation = state.begin(SessionStatus::Generating);
            (operation, state.inputs(), source, mime_type, style)
        };
        info!(
            "Generating from {} target_generation={} user_generation={}",
            source.display(),
            inputs.target,
            inputs.user
        );

        let mut timer =
            OperationTimer::start("generate", operation, Some(source.display().to_string()));
        let result = match encode_file(&source).await {
            Ok(encoded) => {
                self.synthesizer
                    .synthesize(&encoded, &mime_type, &style)
                    .await
            }
            Err(err) => Err(err),
        };

        let mut state = self.state.lock();
        state.finish(operation);
        let current = state.inputs() == inputs;
        let outcome = match result {
            Ok(Some(data_base64)) => {
                let image = Arc::new(GeneratedImage {
                    id: state.next_image_id(),
                    data_base64,
                });
                Ok(image)
            }
            Ok(None) => Err(StudioError::EmptyResult),
            Err(err) => Err(err),
        };

        if !current {
            warn!(
                "Discarding result of operation {}; inputs changed while it was running",
                operation
            );
            timer.complete("discarded", None);
            return outcome;
        }

        match outcome {
            Ok(image) => {
                info!("Generated image {} ({} base64 chars)", image.id, image.data_base64.len());
                state.generated = Some(Arc::clone(&image));
                state.history.insert(0, Arc::clone(&image));
                timer.complete("success", Some(image.id.to_string()));
                Ok(image)
            }
            Err(err) => {
                error!("Image generation failed: {}", err);
                state.error = Some(err.to_string());
                timer.complete(err.kind(), Some(err.to_string()));
                Err(err)
            }
        }
    }

    fn accept_upload(&self, path: PathBuf) -> Result<UploadedImage, StudioError> {
        UploadedImage::from_path(path, &self.previews).inspect_err(|err| {
            warn!("Rejected upload: {}", err);
            self.state.lock().error = Some(err.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;

    enum Reply<T> {
        Value(T),
        Fail(StudioError),
        Gated(T, Arc<Notify>),
    }

    #[derive(Default)]
    struct FakeAnalyzer {
        replies: Mutex<VecDeque<Reply<String>>>,
        calls: AtomicUsize,
        mime_types: Mutex<Vec<String>>,
    }

    impl FakeAnalyzer {
        fn with(replies: Vec<Reply<String>>) -> Arc<Self> {
            Arc::new(FakeAnalyzer {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl StyleAnalyzer for FakeAnalyzer {
        async fn analyze_style(
            &self,
            _image_base64: &str,
            mime_type: &str,
        ) -> Result<String, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.mime_types.lock().push(mime_type.to_string());
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Value(text)) => Ok(text),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Gated(text, gate)) => {
                    gate.notified().await;
                    Ok(text)
                }
                None => Err(StudioError::Service("no scripted reply".into())),
            }
        }
    }

    #[derive(Default)]
    struct FakeSynthesizer {
        replies: Mutex<VecDeque<Reply<Option<String>>>>,
        calls: AtomicUsize,
        styles: Mutex<Vec<String>>,
    }

    impl FakeSynthesizer {
        fn with(replies: Vec<Reply<Option<String>>>) -> Arc<Self> {
            Arc::new(FakeSynthesizer {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ImageSynthesizer for FakeSynthesizer {
        async fn synthesize(
            &self,
            _image_base64: &str,
            _mime_type: &str,
            style_description: &str,
        ) -> Result<Option<String>, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.styles.lock().push(style_description.to_string());
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Value(image)) => Ok(image),
                Some(Reply::Fail(err)) => Err(err),
                Some(Reply::Gated(image, gate)) => {
                    gate.notified().await;
                    Ok(image)
                }
                None => Err(StudioError::Service("no scripted reply".into())),
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn image(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(name.as_bytes()).unwrap();
            path
        }
    }

    fn session(analyzer: &Arc<FakeAnalyzer>, synthesizer: &Arc<FakeSynthesizer>) -> Session {
        Session::new(analyzer.clone(), synthesizer.clone())
    }

    #[tokio::test]
    async fn target_upload_stores_description_and_returns_to_idle() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value(
            "soft window light, urban background, 90s film look".into(),
        )]);
        let synthesizer = FakeSynthesizer::with(vec![]);
        let session = session(&analyzer, &synthesizer);

        session.upload_target(fixture.image("target.jpg")).await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(
            snapshot.style_description.as_deref(),
            Some("soft window light, urban background, 90s film look")
        );
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.target_preview.is_some());
        assert_eq!(analyzer.mime_types.lock().as_slice(), ["image/jpeg"]);
    }

    #[tokio::test]
    async fn generate_creates_png_data_uri_and_prepends_history() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("90s film look".into())]);
        let synthesizer = FakeSynthesizer::with(vec![
            Reply::Value(Some("Zm9v".into())),
            Reply::Value(Some("YmFy".into())),
        ]);
        let session = session(&analyzer, &synthesizer);

        session.upload_target(fixture.image("target.jpg")).await.unwrap();
        session.upload_user(fixture.image("user.png")).unwrap();

        let first = session.generate().await.unwrap();
        assert_eq!(first.data_uri(), "data:image/png;base64,Zm9v");
        assert_eq!(first.bytes().unwrap(), b"foo");
        let snapshot = session.snapshot();
        assert_eq!(snapshot.history, vec![first.clone()]);
        assert_eq!(snapshot.generated, Some(first.clone()));
        assert_eq!(snapshot.status, SessionStatus::Idle);

        let second = session.generate().await.unwrap();
        assert!(second.id > first.id);
        let history = session.snapshot().history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].data_base64, "YmFy");
        assert_eq!(history[1].data_base64, "Zm9v");
        assert_eq!(session.history_item(first.id), Some(first));
        assert_eq!(synthesizer.styles.lock()[0], "90s film look");
    }

    #[tokio::test]
    async fn empty_synthesis_result_leaves_history_unchanged() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![
            Reply::Value(Some("Zm9v".into())),
            Reply::Value(None),
        ]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.png")).await.unwrap();
        session.upload_user(fixture.image("u.png")).unwrap();
        session.generate().await.unwrap();

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, StudioError::EmptyResult));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.generated, None);
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("The API did not return an image. Please try again.")
        );
    }

    #[tokio::test]
    async fn generate_without_description_makes_no_call() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Fail(StudioError::Service(
            "Failed to analyze image style: boom".into(),
        ))]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Value(Some("Zm9v".into()))]);
        let session = session(&analyzer, &synthesizer);

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));

        session.upload_user(fixture.image("u.png")).unwrap();
        assert!(session.upload_target(fixture.image("t.png")).await.is_err());
        assert_eq!(session.snapshot().style_description, None);

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
        assert_eq!(session.snapshot().error.as_deref(), Some(MISSING_INPUTS_MESSAGE));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn generate_without_user_image_makes_no_call() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.webp")).await.unwrap();

        assert!(!session.snapshot().can_generate());
        assert!(matches!(
            session.generate().await,
            Err(StudioError::Validation(_))
        ));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn new_target_clears_description_and_result() {
        let fixture = Fixture::new();
        let gate = Arc::new(Notify::new());
        let analyzer = FakeAnalyzer::with(vec![
            Reply::Value("first".into()),
            Reply::Gated("second".into(), gate.clone()),
        ]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Value(Some("Zm9v".into()))]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("a.png")).await.unwrap();
        session.upload_user(fixture.image("u.png")).unwrap();
        session.generate().await.unwrap();

        let observer = session.clone();
        let check = async {
            tokio::task::yield_now().await;
            let snapshot = observer.snapshot();
            assert_eq!(snapshot.style_description, None);
            assert_eq!(snapshot.generated, None);
            assert_eq!(snapshot.status, SessionStatus::Analyzing);
            assert_eq!(snapshot.button_label(), "Analyzing Style...");
            assert!(!snapshot.can_generate());
            assert!(matches!(
                observer.generate().await,
                Err(StudioError::Validation(_))
            ));
            gate.notify_one();
        };
        let (uploaded, ()) = tokio::join!(session.upload_target(fixture.image("b.png")), check);
        uploaded.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.style_description.as_deref(), Some("second"));
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_analysis_is_discarded() {
        let fixture = Fixture::new();
        let gate = Arc::new(Notify::new());
        let analyzer = FakeAnalyzer::with(vec![
            Reply::Gated("stale".into(), gate.clone()),
            Reply::Value("fresh".into()),
        ]);
        let synthesizer = FakeSynthesizer::with(vec![]);
        let session = session(&analyzer, &synthesizer);
        let first = fixture.image("first.png");
        let second = fixture.image("second.png");

        let newer = session.clone();
        let (old, new) = tokio::join!(session.upload_target(first), async {
            while analyzer.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            let result = newer.upload_target(second).await;
            gate.notify_one();
            result
        });
        old.unwrap();
        new.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.style_description.as_deref(), Some("fresh"));
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(session.live_previews(), 1);
    }

    #[tokio::test]
    async fn user_upload_during_analysis_keeps_description() {
        let fixture = Fixture::new();
        let gate = Arc::new(Notify::new());
        let analyzer = FakeAnalyzer::with(vec![Reply::Gated("style".into(), gate.clone())]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Value(Some("Zm9v".into()))]);
        let session = session(&analyzer, &synthesizer);
        let user = fixture.image("u.png");

        let other = session.clone();
        let (analyzed, ()) = tokio::join!(session.upload_target(fixture.image("t.png")), async {
            while analyzer.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            other.upload_user(user).unwrap();
            assert_eq!(other.status(), SessionStatus::Analyzing);
            gate.notify_one();
        });
        analyzed.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.style_description.as_deref(), Some("style"));
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.can_generate());
        let image = session.generate().await.unwrap();
        assert_eq!(session.snapshot().history, vec![image]);
    }

    #[tokio::test]
    async fn target_upload_during_generation_discards_result() {
        let fixture = Fixture::new();
        let gate = Arc::new(Notify::new());
        let analyzer = FakeAnalyzer::with(vec![
            Reply::Value("old style".into()),
            Reply::Value("new style".into()),
        ]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Gated(Some("Zm9v".into()), gate.clone())]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t1.png")).await.unwrap();
        session.upload_user(fixture.image("u.png")).unwrap();
        let replacement = fixture.image("t2.png");

        let other = session.clone();
        let (result, ()) = tokio::join!(session.generate(), async {
            while synthesizer.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            other.upload_target(replacement).await.unwrap();
            gate.notify_one();
        });

        assert!(result.is_ok());
        let snapshot = session.snapshot();
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.style_description.as_deref(), Some("new style"));
        assert_eq!(snapshot.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn user_upload_during_generation_discards_result_but_reaches_idle() {
        let fixture = Fixture::new();
        let gate = Arc::new(Notify::new());
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Gated(Some("Zm9v".into()), gate.clone())]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.png")).await.unwrap();
        session.upload_user(fixture.image("u1.png")).unwrap();
        let replacement = fixture.image("u2.jpeg");

        let other = session.clone();
        let (result, ()) = tokio::join!(session.generate(), async {
            while synthesizer.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            assert_eq!(other.status(), SessionStatus::Generating);
            assert_eq!(other.snapshot().button_label(), "Generating Image...");
            other.upload_user(replacement).unwrap();
            gate.notify_one();
        });

        assert!(result.is_ok());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.generated, None);
        assert!(snapshot.can_generate());
    }

    #[tokio::test]
    async fn failures_never_leave_the_session_busy() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![
            Reply::Fail(StudioError::Authentication),
            Reply::Fail(StudioError::Service("Failed to generate image: quota".into())),
        ]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.png")).await.unwrap();
        session.upload_user(fixture.image("u.png")).unwrap();

        let auth = session.generate().await.unwrap_err();
        assert_eq!(session.status(), SessionStatus::Idle);
        let auth_message = session.snapshot().error.unwrap();
        assert!(auth_message.contains("Invalid API Key"));
        assert!(matches!(auth, StudioError::Authentication));

        session.generate().await.unwrap_err();
        assert_eq!(session.status(), SessionStatus::Idle);
        let service_message = session.snapshot().error.unwrap();
        assert!(!service_message.contains("Invalid API Key"));
        assert!(session.snapshot().history.is_empty());
    }

    #[tokio::test]
    async fn unreadable_user_file_is_reported_and_session_returns_to_idle() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![Reply::Value(Some("Zm9v".into()))]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.png")).await.unwrap();
        let user = fixture.image("u.png");
        session.upload_user(&user).unwrap();
        std::fs::remove_file(&user).unwrap();

        let err = session.generate().await.unwrap_err();
        assert!(matches!(err, StudioError::Io { .. }));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_upload_keeps_previous_image() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(vec![Reply::Value("style".into())]);
        let synthesizer = FakeSynthesizer::with(vec![]);
        let session = session(&analyzer, &synthesizer);
        session.upload_target(fixture.image("t.png")).await.unwrap();

        let err = session
            .upload_target(fixture.image("notes.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Validation(_)));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.style_description.as_deref(), Some("style"));
        assert!(snapshot.error.is_some());
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_uploads_release_old_previews() {
        let fixture = Fixture::new();
        let analyzer = FakeAnalyzer::with(
            (0..4).map(|index| Reply::Value(format!("style {index}"))).collect(),
        );
        let synthesizer = FakeSynthesizer::with(vec![]);
        let session = session(&analyzer, &synthesizer);

        for index in 0..4 {
            session
                .upload_target(fixture.image(&format!("t{index}.png")))
                .await
                .unwrap();
            session.upload_user(fixture.image(&format!("u{index}.png"))).unwrap();
            assert_eq!(session.live_previews(), 2);
            assert_eq!(
                session.snapshot().style_description,
                Some(format!("style {index}"))
            );
        }
    }
}
