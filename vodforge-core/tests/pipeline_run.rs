use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use vodforge_core::gateway::{
    DocumentInfo, GatewayError, IncomingMediaEvent, MediaGateway, ProgressFn,
};
use vodforge_core::publish::{ObjectStore, PublishError, Publisher};
use vodforge_core::transcode::{EngineExecutor, EngineOutput, Transcoder};
use vodforge_core::{
    Dispatcher, ItemPipeline, ItemStage, PipelineError, PipelineSection, StorageSection,
    TelegramSection, TranscodeSection, VodforgeConfig,
};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

fn exit_status(code: i32) -> ExitStatus {
    #[cfg(unix)]
    {
        ExitStatus::from_raw(code << 8)
    }
    #[cfg(windows)]
    {
        ExitStatus::from_raw(code as u32)
    }
}

fn test_config(base: &TempDir, multi_bitrate: bool) -> VodforgeConfig {
    VodforgeConfig {
        telegram: TelegramSection {
            bot_token: "123:abc".into(),
            api_base: "https://api.telegram.org".into(),
            watch_chat: None,
        },
        storage: StorageSection {
            bucket: "media".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            endpoint_url: "https://acct.r2.cloudflarestorage.com".into(),
            key_root: "videos".into(),
            dry_run: false,
        },
        transcode: TranscodeSection {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            segment_seconds: 6,
            multi_bitrate,
        },
        pipeline: PipelineSection {
            workdir_root: base.path().join("work"),
            public_base_url: "https://cdn.example.com".into(),
            cleanup: false,
            max_attempts: 3,
            retry_delay_seconds: [1, 1],
        },
    }
}

/// Gateway double: serves a canned payload and records outbound messages.
struct MockGateway {
    payload: Vec<u8>,
    fail_download: bool,
    sent: Mutex<Vec<(i64, String)>>,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            payload: b"FAKE VIDEO".to_vec(),
            fail_download: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn failing_download() -> Self {
        Self {
            fail_download: true,
            ..Self::new()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl MediaGateway for MockGateway {
    async fn download_media(
        &self,
        _event: &IncomingMediaEvent,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<(), GatewayError> {
        if self.fail_download {
            return Err(GatewayError::Download("file reference expired".into()));
        }
        std::fs::write(dest, &self.payload).map_err(|source| GatewayError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
        let total = self.payload.len() as u64;
        progress(total, Some(total));
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

/// Engine double: materializes a playlist plus one segment per invocation,
/// failing when the playlist path contains `fail_marker`, and only after
/// `fail_first` calls have gone by.
struct StubEngine {
    calls: Mutex<u32>,
    fail_marker: Option<&'static str>,
    fail_first: u32,
}

impl StubEngine {
    fn new() -> Self {
        Self {
            calls: Mutex::new(0),
            fail_marker: None,
            fail_first: 0,
        }
    }

    fn failing_for(marker: &'static str) -> Self {
        Self {
            fail_marker: Some(marker),
            ..Self::new()
        }
    }

    fn flaky(fail_first: u32) -> Self {
        Self {
            fail_marker: Some(""),
            fail_first,
            ..Self::new()
        }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EngineExecutor for StubEngine {
    async fn run(&self, command: &mut Command) -> std::io::Result<EngineOutput> {
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let playlist = PathBuf::from(args.last().unwrap());
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if let Some(marker) = self.fail_marker {
            let past_grace = self.fail_first == 0 || call <= self.fail_first;
            if past_grace && playlist.to_string_lossy().contains(marker) {
                return Ok(EngineOutput {
                    status: exit_status(1),
                    tail: "Conversion failed!".into(),
                });
            }
        }
        std::fs::write(&playlist, "#EXTM3U\n#EXT-X-ENDLIST\n")?;
        std::fs::write(playlist.with_extension("ts"), b"segment")?;
        Ok(EngineOutput {
            status: exit_status(0),
            tail: String::new(),
        })
    }
}

/// Store double: records uploads, optionally rejecting every put.
struct RecordingStore {
    keys: Mutex<Vec<String>>,
    reject: bool,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            reject: false,
        }
    }

    fn rejecting() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys = self.keys.lock().unwrap().clone();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload_file(
        &self,
        _local: &Path,
        _bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> Result<(), PublishError> {
        if self.reject {
            return Err(PublishError::Upload {
                key: key.to_string(),
                reason: "access denied".into(),
            });
        }
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

fn build_pipeline(
    config: &VodforgeConfig,
    gateway: Arc<MockGateway>,
    engine: Arc<StubEngine>,
    store: Arc<RecordingStore>,
) -> ItemPipeline {
    let transcoder = Transcoder::new(&config.transcode).with_executor(engine);
    let publisher = Publisher::new(store, &config.storage);
    ItemPipeline::new(gateway, transcoder, publisher, config)
        .with_retry_sleep_cap(Duration::from_millis(5))
}

fn video_event(file_id: &str) -> IncomingMediaEvent {
    IncomingMediaEvent {
        chat_id: 99,
        message_id: 1,
        video_flag: false,
        // No filename attribute: the extension resolves from the mime type.
        document: Some(DocumentInfo {
            id: Some(file_id.to_string()),
            mime_type: Some("video/mp4".into()),
            file_name: None,
            size: Some(10),
        }),
    }
}

#[tokio::test]
async fn mp4_event_completes_and_notifies_playlist_url() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let report = pipeline.run(video_event("vid-1")).await.unwrap();

    assert_eq!(report.item_id, "vid-1");
    assert_eq!(report.stage, ItemStage::Completed);
    assert_eq!(
        report.playlist_url,
        "https://cdn.example.com/videos/vid-1/playlist.m3u8"
    );
    assert_eq!(
        store.keys(),
        vec![
            "videos/vid-1/playlist.m3u8".to_string(),
            "videos/vid-1/playlist.ts".to_string(),
        ]
    );

    let messages = gateway.messages();
    assert_eq!(messages.len(), 4);
    assert!(messages[0].contains("Downloading"));
    assert!(messages[1].contains("Transcoding"));
    assert!(messages[2].contains("Uploading"));
    assert_eq!(
        messages[3],
        "✅ Ready: https://cdn.example.com/videos/vid-1/playlist.m3u8"
    );

    // cleanup disabled: the staged output survives
    assert!(base.path().join("work/vid-1/hls/playlist.m3u8").exists());
}

#[tokio::test]
async fn ladder_failure_uploads_nothing_and_writes_no_master() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, true);
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::failing_for("480p"));
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let error = pipeline.run(video_event("vid-2")).await.unwrap_err();

    assert!(matches!(error, PipelineError::Transcode(_)));
    assert!(store.keys().is_empty());
    assert!(!base.path().join("work/vid-2/hls/playlist.m3u8").exists());
    // three attempts, each running 720p before hitting the failing 480p
    assert_eq!(engine.call_count(), 6);

    let messages = gateway.messages();
    assert!(messages.last().unwrap().starts_with("❌"));
}

#[tokio::test]
async fn two_failures_then_success_lands_on_the_final_attempt() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::new());
    // Fails twice; the third and last allowed attempt succeeds.
    let engine = Arc::new(StubEngine::flaky(2));
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let report = pipeline.run(video_event("vid-3")).await.unwrap();

    assert_eq!(report.stage, ItemStage::Completed);
    assert_eq!(engine.call_count(), 3);
    assert!(!store.keys().is_empty());
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_error() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::failing_for("playlist"));
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let error = pipeline.run(video_event("vid-4")).await.unwrap_err();

    assert_eq!(engine.call_count(), 3);
    match error {
        PipelineError::Transcode(inner) => {
            assert!(inner.to_string().contains("Conversion failed!"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn download_failure_is_terminal_without_retries() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::failing_download());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let error = pipeline.run(video_event("vid-5")).await.unwrap_err();

    assert!(matches!(error, PipelineError::Download(_)));
    assert_eq!(engine.call_count(), 0);
    assert!(store.keys().is_empty());
    let messages = gateway.messages();
    assert!(messages.last().unwrap().starts_with("❌"));
}

#[tokio::test]
async fn rejected_uploads_fail_the_item_after_retries() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::rejecting());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    let error = pipeline.run(video_event("vid-6")).await.unwrap_err();

    assert!(matches!(error, PipelineError::Publish(_)));
    let messages = gateway.messages();
    assert!(messages.last().unwrap().contains("access denied"));
}

#[tokio::test]
async fn cleanup_removes_the_work_directory_after_success() {
    let base = TempDir::new().unwrap();
    let mut config = test_config(&base, false);
    config.pipeline.cleanup = true;
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    pipeline.run(video_event("vid-7")).await.unwrap();

    assert!(!base.path().join("work/vid-7").exists());
}

#[tokio::test]
async fn resubmission_starts_from_a_clean_work_directory() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let stale = base.path().join("work/vid-8/stale.bin");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, b"leftover").unwrap();

    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::new());
    let pipeline = build_pipeline(&config, gateway.clone(), engine.clone(), store.clone());

    pipeline.run(video_event("vid-8")).await.unwrap();

    assert!(!stale.exists());
    assert!(base.path().join("work/vid-8/hls/playlist.m3u8").exists());
}

#[tokio::test]
async fn dispatcher_ignores_non_video_events() {
    let base = TempDir::new().unwrap();
    let config = test_config(&base, false);
    let gateway = Arc::new(MockGateway::new());
    let engine = Arc::new(StubEngine::new());
    let store = Arc::new(RecordingStore::new());
    let pipeline = Arc::new(build_pipeline(
        &config,
        gateway.clone(),
        engine.clone(),
        store.clone(),
    ));
    let dispatcher = Dispatcher::new(pipeline);

    let event = IncomingMediaEvent {
        chat_id: 99,
        message_id: 2,
        video_flag: false,
        document: Some(DocumentInfo {
            id: Some("doc-1".into()),
            mime_type: Some("application/pdf".into()),
            file_name: Some("notes.pdf".into()),
            size: Some(10),
        }),
    };
    assert!(!dispatcher.dispatch(event));
    assert!(gateway.messages().is_empty());
    assert_eq!(engine.call_count(), 0);
}
