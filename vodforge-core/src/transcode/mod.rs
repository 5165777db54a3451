mod error;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscodeSection;
use crate::ladder::{Rendition, RenditionPlan};

pub use error::{TranscodeError, TranscodeResult};

pub const PLAYLIST_NAME: &str = "playlist.m3u8";
pub const VARIANTS_DIR: &str = "variants";

/// Lines of combined engine output retained for failure diagnostics. The
/// full stream goes to the log as it is produced; only this tail is kept
/// in memory.
const OUTPUT_TAIL_LINES: usize = 100;

/// Exit status plus the retained output tail of one engine invocation.
#[derive(Debug)]
pub struct EngineOutput {
    pub status: ExitStatus,
    pub tail: String,
}

/// Seam for the external transcoding engine. The system implementation
/// spawns the real binary; tests inject a fake that materializes
/// playlists without encoding anything.
#[async_trait]
pub trait EngineExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<EngineOutput>;
}

#[derive(Debug, Default)]
pub struct SystemEngineExecutor;

#[async_trait]
impl EngineExecutor for SystemEngineExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<EngineOutput> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        // Drain both pipes concurrently so a chatty engine never blocks on
        // a full pipe buffer.
        let (mut tail, err_tail) = tokio::join!(drain_lines(stdout), drain_lines(stderr));
        tail.extend(err_tail);
        let status = child.wait().await?;
        Ok(EngineOutput {
            status,
            tail: tail.join("\n"),
        })
    }
}

async fn drain_lines<R>(reader: Option<R>) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    if let Some(reader) = reader {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("ffmpeg: {line}");
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    tail.into()
}

/// Description of a completed transcode: the entry-point playlist plus any
/// per-rendition sub-playlists, all rooted at the output directory.
#[derive(Debug, Clone)]
pub struct OutputManifest {
    pub root: PathBuf,
    pub playlist: PathBuf,
    pub variant_playlists: Vec<PathBuf>,
}

pub struct Transcoder {
    ffmpeg: PathBuf,
    segment_seconds: u32,
    executor: Arc<dyn EngineExecutor>,
}

impl Transcoder {
    pub fn new(section: &TranscodeSection) -> Self {
        Self {
            ffmpeg: section.ffmpeg_path.clone(),
            segment_seconds: section.segment_seconds,
            executor: Arc::new(SystemEngineExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn EngineExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Transcode `input` into `output_dir` according to `plan`. The output
    /// directory is cleared of prior contents first, so a retry at the
    /// same path never mixes in stale segments.
    pub async fn transcode(
        &self,
        input: &Path,
        output_dir: &Path,
        plan: &RenditionPlan,
    ) -> TranscodeResult<OutputManifest> {
        if !input.is_file() {
            return Err(TranscodeError::MissingInput(input.to_path_buf()));
        }
        create_dir(output_dir).await?;
        clear_dir(output_dir).await?;

        if !plan.is_ladder() {
            let rendition = &plan.renditions()[0];
            let playlist = output_dir.join(PLAYLIST_NAME);
            let segments = output_dir.join("seg_%05d.ts");
            self.run_rendition(input, &playlist, &segments, rendition, false)
                .await?;
            info!(playlist = %playlist.display(), "transcode completed");
            return Ok(OutputManifest {
                root: output_dir.to_path_buf(),
                playlist,
                variant_playlists: Vec::new(),
            });
        }

        let variants_dir = output_dir.join(VARIANTS_DIR);
        create_dir(&variants_dir).await?;
        let mut variant_playlists = Vec::with_capacity(plan.renditions().len());
        for rendition in plan.renditions() {
            let playlist = variants_dir.join(format!("{}.m3u8", rendition.name));
            let segments = variants_dir.join(format!("seg_{}_%05d.ts", rendition.name));
            self.run_rendition(input, &playlist, &segments, rendition, true)
                .await?;
            variant_playlists.push(playlist);
        }

        let master = output_dir.join(PLAYLIST_NAME);
        let contents = master_playlist(plan);
        fs::write(&master, contents)
            .await
            .map_err(|source| TranscodeError::Io {
                path: master.clone(),
                source,
            })?;
        info!(playlist = %master.display(), "master playlist written");
        Ok(OutputManifest {
            root: output_dir.to_path_buf(),
            playlist: master,
            variant_playlists,
        })
    }

    async fn run_rendition(
        &self,
        input: &Path,
        playlist: &Path,
        segment_pattern: &Path,
        rendition: &Rendition,
        ladder: bool,
    ) -> TranscodeResult<()> {
        let args = self.rendition_args(input, playlist, segment_pattern, rendition, ladder);
        info!(rendition = rendition.name, "running ffmpeg");
        debug!(args = %args.join(" "), "engine arguments");
        let mut command = Command::new(&self.ffmpeg);
        command.args(&args);
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| TranscodeError::Io {
                path: self.ffmpeg.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(TranscodeError::Engine {
                rendition: rendition.name.to_string(),
                status: output.status.code(),
                output: output.tail,
            });
        }
        Ok(())
    }

    fn rendition_args(
        &self,
        input: &Path,
        playlist: &Path,
        segment_pattern: &Path,
        rendition: &Rendition,
        ladder: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            // First video stream, first audio stream if present.
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "0:a:0?".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-g".to_string(),
            "48".to_string(),
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            rendition.audio_bitrate(),
            "-vf".to_string(),
            format!("scale={}:flags=lanczos", rendition.scale()),
        ];
        if ladder {
            args.push("-maxrate".to_string());
            args.push(rendition.video_bitrate());
            args.push("-bufsize".to_string());
            args.push("2M".to_string());
        }
        args.push("-hls_time".to_string());
        args.push(self.segment_seconds.to_string());
        args.push("-hls_playlist_type".to_string());
        args.push("vod".to_string());
        args.push("-hls_segment_filename".to_string());
        args.push(segment_pattern.to_string_lossy().into_owned());
        args.push(playlist.to_string_lossy().into_owned());
        args
    }
}

/// Master playlist per the plan's descending-quality order.
fn master_playlist(plan: &RenditionPlan) -> String {
    let mut contents = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in plan.renditions() {
        contents.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            rendition.bandwidth(),
            rendition.resolution()
        ));
        contents.push_str(&format!("{VARIANTS_DIR}/{}.m3u8\n", rendition.name));
    }
    contents
}

async fn create_dir(dir: &Path) -> TranscodeResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|source| TranscodeError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

async fn clear_dir(dir: &Path) -> TranscodeResult<()> {
    let mut entries = fs::read_dir(dir).await.map_err(|source| TranscodeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| TranscodeError::Io {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|source| TranscodeError::Io { path, source })?;
    }
    Ok(())
}
