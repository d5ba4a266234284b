//! ffmpeg-backed encode pipeline.
//!
//! Drives one ffmpeg process per recording: spawns it with per-OS screen
//! capture input arguments, parses encode progress from stderr, stops it
//! gracefully by writing `q` on stdin with a kill fallback, and reports the
//! terminal outcome through the observer.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{AudioCodec, AudioEncodeConfig, ContainerFormat, VideoCodec, VideoEncodeConfig};
use crate::error::PipelineError;

use super::{EncodePipeline, EncodePipelineFactory, PipelineObserver, PipelineSpec};

/// How long a stopped ffmpeg gets to finalize the file before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Non-progress stderr lines kept for the exit report.
const STDERR_TAIL_LINES: usize = 8;

/// Builds [`FfmpegPipeline`]s around an ffmpeg binary.
pub struct FfmpegPipelineFactory {
    binary: PathBuf,
}

impl FfmpegPipelineFactory {
    /// Factory using `ffmpeg` from PATH.
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Factory using a specific ffmpeg binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the configured binary runs at all.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegPipelineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodePipelineFactory for FfmpegPipelineFactory {
    fn can_encode(&self, video: &VideoEncodeConfig, audio: Option<&AudioEncodeConfig>) -> bool {
        container_supports_video(video.container, video.codec)
            && audio.map_or(true, |a| container_supports_audio(video.container, a.codec))
    }

    fn create(&self, spec: PipelineSpec<'_>) -> Result<Arc<dyn EncodePipeline>, PipelineError> {
        if !self.can_encode(spec.video, spec.audio) {
            return Err(PipelineError::StartRejected {
                reason: format!(
                    "container {:?} cannot carry codec {}",
                    spec.video.container,
                    spec.video.codec.as_str()
                ),
            });
        }

        let handle = Handle::try_current().map_err(|_| PipelineError::StartRejected {
            reason: "ffmpeg pipeline requires a tokio runtime".to_string(),
        })?;

        let args = build_capture_args(spec.video, spec.audio, spec.output_path)?;
        debug!(
            "ffmpeg pipeline for display '{}': {:?}",
            spec.display.name(),
            args
        );

        Ok(Arc::new(FfmpegPipeline {
            binary: self.binary.clone(),
            args,
            output_path: spec.output_path.to_path_buf(),
            observer: spec.observer,
            handle,
            inner: Arc::new(Mutex::new(Inner::default())),
        }))
    }
}

#[derive(Default)]
struct Inner {
    started: bool,
    stopped: bool,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Encode pipeline over an ffmpeg child process.
pub struct FfmpegPipeline {
    binary: PathBuf,
    args: Vec<String>,
    output_path: PathBuf,
    observer: Arc<dyn PipelineObserver>,
    handle: Handle,
    inner: Arc<Mutex<Inner>>,
}

impl FfmpegPipeline {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EncodePipeline for FfmpegPipeline {
    fn start(&self) -> Result<(), PipelineError> {
        let mut inner = self.lock_inner();
        if inner.started {
            return Err(PipelineError::StartRejected {
                reason: "pipeline already started".to_string(),
            });
        }
        // A stop that raced ahead of start wins; the process never spawns.
        if inner.stopped {
            return Err(PipelineError::StartRejected {
                reason: "pipeline already stopped".to_string(),
            });
        }

        // Entering the runtime lets the process register with the reactor
        // even when start is called from a plain thread.
        let _guard = self.handle.enter();
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::Io)?;

        let stdin = child.stdin.take();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::StartRejected {
                reason: "ffmpeg stderr unavailable".to_string(),
            })?;

        let (kill_tx, kill_rx) = oneshot::channel();
        inner.started = true;
        inner.stdin = stdin;
        inner.kill_tx = Some(kill_tx);
        drop(inner);

        info!("ffmpeg recording to {:?}", self.output_path);

        self.handle.spawn(monitor(
            child,
            stderr,
            kill_rx,
            self.observer.clone(),
            self.inner.clone(),
            self.output_path.clone(),
        ));

        Ok(())
    }

    fn stop(&self) {
        let (stdin, kill_tx) = {
            let mut inner = self.lock_inner();
            inner.stopped = true;
            (inner.stdin.take(), inner.kill_tx.take())
        };

        // Stopped already, never started, or a second stop: nothing to do.
        let Some(mut stdin) = stdin else {
            debug!("ffmpeg stop with no active process");
            return;
        };

        self.handle.spawn(async move {
            debug!("Sending 'q' to ffmpeg");
            if let Err(e) = stdin.write_all(b"q").await {
                warn!("Failed to send 'q' to ffmpeg: {}", e);
            }
            let _ = stdin.flush().await;

            tokio::time::sleep(STOP_GRACE).await;
            if let Some(tx) = kill_tx {
                // Only lands if the monitor is still running.
                let _ = tx.send(());
            }
        });
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

async fn monitor(
    mut child: Child,
    stderr: ChildStderr,
    mut kill_rx: oneshot::Receiver<()>,
    observer: Arc<dyn PipelineObserver>,
    inner: Arc<Mutex<Inner>>,
    output_path: PathBuf,
) {
    observer.on_start();

    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut killed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_stderr_line(&line, observer.as_ref(), &mut tail),
                    Ok(None) | Err(_) => break,
                }
            }
            _ = &mut kill_rx, if !killed => {
                warn!("ffmpeg did not exit within {:?}, killing", STOP_GRACE);
                killed = true;
                if let Err(e) = child.start_kill() {
                    debug!("ffmpeg kill failed (already exited?): {}", e);
                }
            }
        }
    }

    let status = child.wait().await;

    if let Ok(mut inner) = inner.lock() {
        inner.stdin = None;
        inner.kill_tx = None;
    }

    match status {
        Ok(status) if status.success() => {
            info!("ffmpeg finished {:?}", output_path);
            observer.on_stop(None);
        }
        Ok(status) => {
            if !tail.is_empty() {
                warn!(
                    "ffmpeg stderr tail: {}",
                    tail.iter().cloned().collect::<Vec<_>>().join(" | ")
                );
            }
            observer.on_stop(Some(PipelineError::EncoderExited {
                status: status.to_string(),
            }));
        }
        Err(e) => observer.on_stop(Some(PipelineError::Io(e))),
    }
}

fn handle_stderr_line(line: &str, observer: &dyn PipelineObserver, tail: &mut VecDeque<String>) {
    // Progress lines carry both time= and bitrate=; everything else is
    // banner/diagnostic output.
    if line.contains("time=") && line.contains("bitrate=") {
        if let Some(micros) = extract_value(line, "time=").and_then(|v| parse_timestamp_micros(&v))
        {
            observer.on_progress(micros);
        }
        return;
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    debug!("ffmpeg: {}", trimmed);
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(trimmed.to_string());
}

/// Pull the value following `key` out of an ffmpeg progress line.
fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let after_key = &line[start..];
    let value_start = after_key.find(|c: char| !c.is_whitespace()).unwrap_or(0);
    let value_part = &after_key[value_start..];
    let end = value_part
        .find(|c: char| c.is_whitespace())
        .unwrap_or(value_part.len());

    if end == 0 {
        None
    } else {
        Some(value_part[..end].to_string())
    }
}

/// Parse an ffmpeg `HH:MM:SS.frac` timestamp into microseconds.
///
/// Returns `None` for `N/A` and the negative warmup timestamps ffmpeg
/// emits before the first frame.
fn parse_timestamp_micros(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let (seconds_str, frac_str) = match seconds_part.split_once('.') {
        Some((s, f)) => (s, f),
        None => (seconds_part, ""),
    };
    let seconds: u64 = seconds_str.parse().ok()?;

    let frac_micros: u64 = if frac_str.is_empty() {
        0
    } else {
        // Scale an arbitrary number of fractional digits to microseconds.
        let digits: String = frac_str.chars().take(6).collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let parsed: u64 = digits.parse().ok()?;
        parsed * 10u64.pow(6 - digits.len() as u32)
    };

    Some((hours * 3600 + minutes * 60 + seconds) * 1_000_000 + frac_micros)
}

/// Full ffmpeg argument list for one recording.
fn build_capture_args(
    video: &VideoEncodeConfig,
    audio: Option<&AudioEncodeConfig>,
    output_path: &Path,
) -> Result<Vec<String>, PipelineError> {
    let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
    args.extend(capture_input_args(video, audio.is_some())?);
    args.extend(encode_args(video, audio));
    args.push(output_path.to_string_lossy().to_string());
    Ok(args)
}

/// Per-OS screen (and audio) capture inputs.
fn capture_input_args(
    video: &VideoEncodeConfig,
    capture_audio: bool,
) -> Result<Vec<String>, PipelineError> {
    let framerate = video.frame_rate.to_string();
    let video_size = format!("{}x{}", video.width, video.height);

    match std::env::consts::OS {
        "macos" => {
            let input = if capture_audio { "1:0" } else { "1" };
            Ok(vec![
                "-f".to_string(),
                "avfoundation".to_string(),
                "-framerate".to_string(),
                framerate,
                "-capture_cursor".to_string(),
                "1".to_string(),
                "-i".to_string(),
                input.to_string(),
            ])
        }
        "linux" => {
            let mut args = vec![
                "-f".to_string(),
                "x11grab".to_string(),
                "-framerate".to_string(),
                framerate,
                "-video_size".to_string(),
                video_size,
                "-i".to_string(),
                std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string()),
            ];
            if capture_audio {
                args.extend([
                    "-f".to_string(),
                    "pulse".to_string(),
                    "-i".to_string(),
                    "default".to_string(),
                ]);
            }
            Ok(args)
        }
        "windows" => {
            if capture_audio {
                debug!("Audio capture not wired for gdigrab input, recording video only");
            }
            Ok(vec![
                "-f".to_string(),
                "gdigrab".to_string(),
                "-framerate".to_string(),
                framerate,
                "-i".to_string(),
                "desktop".to_string(),
            ])
        }
        other => Err(PipelineError::StartRejected {
            reason: format!("unsupported OS for screen capture: {}", other),
        }),
    }
}

/// Encoder and muxer arguments shared by all platforms.
fn encode_args(video: &VideoEncodeConfig, audio: Option<&AudioEncodeConfig>) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_string(),
        video_encoder_name(video.codec).to_string(),
        "-b:v".to_string(),
        video.bitrate.to_string(),
        "-r".to_string(),
        video.frame_rate.to_string(),
        "-g".to_string(),
        (u64::from(video.frame_rate) * u64::from(video.iframe_interval_secs)).to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];

    if let Some(profile) = &video.profile {
        args.extend(["-profile:v".to_string(), profile.clone()]);
    }

    match audio {
        // Audio capture is only wired on macOS and Linux; the extra encode
        // args are harmless when no audio input exists.
        Some(audio) => {
            args.extend([
                "-c:a".to_string(),
                audio_encoder_name(audio.codec).to_string(),
                "-b:a".to_string(),
                audio.bitrate.to_string(),
                "-ar".to_string(),
                audio.sample_rate.to_string(),
                "-ac".to_string(),
                audio.channels.to_string(),
            ]);
            if let Some(profile) = &audio.profile {
                args.extend(["-profile:a".to_string(), profile.clone()]);
            }
        }
        None => args.push("-an".to_string()),
    }

    if video.container == ContainerFormat::Mp4 {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args
}

fn video_encoder_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "libx264",
        VideoCodec::Hevc => "libx265",
        VideoCodec::Av1 => "libaom-av1",
    }
}

fn audio_encoder_name(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Aac => "aac",
        AudioCodec::Opus => "libopus",
    }
}

fn container_supports_video(container: ContainerFormat, codec: VideoCodec) -> bool {
    match container {
        ContainerFormat::Mp4 | ContainerFormat::Mkv => true,
        ContainerFormat::Webm => codec == VideoCodec::Av1,
    }
}

fn container_supports_audio(container: ContainerFormat, codec: AudioCodec) -> bool {
    match container {
        ContainerFormat::Mkv => true,
        ContainerFormat::Mp4 => codec == AudioCodec::Aac,
        ContainerFormat::Webm => codec == AudioCodec::Opus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_config() -> VideoEncodeConfig {
        VideoEncodeConfig {
            width: 1920,
            height: 1080,
            frame_rate: 60,
            bitrate: 10_000_000,
            iframe_interval_secs: 1,
            codec: VideoCodec::H264,
            container: ContainerFormat::Mp4,
            profile: None,
        }
    }

    fn audio_config() -> AudioEncodeConfig {
        AudioEncodeConfig {
            codec: AudioCodec::Aac,
            bitrate: 128_000,
            sample_rate: 44_100,
            channels: 2,
            profile: None,
        }
    }

    #[test]
    fn test_extract_value() {
        let line = "frame= 123 fps= 60.0 size= 1024kB time=00:00:10.00 bitrate= 2000.0kbits/s";

        assert_eq!(extract_value(line, "frame="), Some("123".to_string()));
        assert_eq!(extract_value(line, "time="), Some("00:00:10.00".to_string()));
        assert_eq!(
            extract_value(line, "bitrate="),
            Some("2000.0kbits/s".to_string())
        );
        assert_eq!(extract_value(line, "missing="), None);
    }

    #[test]
    fn test_parse_timestamp_micros() {
        assert_eq!(parse_timestamp_micros("00:00:00.00"), Some(0));
        assert_eq!(parse_timestamp_micros("00:00:10.00"), Some(10_000_000));
        assert_eq!(
            parse_timestamp_micros("00:01:23.45"),
            Some(83_450_000)
        );
        assert_eq!(
            parse_timestamp_micros("01:00:00.5"),
            Some(3_600_500_000)
        );
        assert_eq!(parse_timestamp_micros("N/A"), None);
        // ffmpeg warmup can report negative times
        assert_eq!(parse_timestamp_micros("-577014:32:22.77"), None);
        assert_eq!(parse_timestamp_micros("garbage"), None);
    }

    #[test]
    fn test_build_args_video_only() {
        let args = build_capture_args(&video_config(), None, Path::new("/tmp/out.mp4")).unwrap();

        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
        // Keyframe every frame_rate * interval frames
        let g_pos = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[g_pos + 1], "60");
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_build_args_profile_flags() {
        let mut video = video_config();
        video.profile = Some("high".to_string());
        let mut audio = audio_config();
        audio.profile = Some("aac_low".to_string());

        let args =
            build_capture_args(&video, Some(&audio), Path::new("/tmp/out.mp4")).unwrap();
        let v_pos = args.iter().position(|a| a == "-profile:v").unwrap();
        assert_eq!(args[v_pos + 1], "high");
        let a_pos = args.iter().position(|a| a == "-profile:a").unwrap();
        assert_eq!(args[a_pos + 1], "aac_low");

        // Unset profiles leave the encoder defaults alone.
        let args = build_capture_args(&video_config(), None, Path::new("/tmp/out.mp4")).unwrap();
        assert!(!args.contains(&"-profile:v".to_string()));
    }

    #[test]
    fn test_build_args_extreme_keyframe_interval() {
        // The -g product can exceed u32::MAX for parseable configs.
        let mut video = video_config();
        video.frame_rate = 2_200_000_000;
        video.iframe_interval_secs = 2;

        let args = build_capture_args(&video, None, Path::new("/tmp/out.mp4")).unwrap();
        let g_pos = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[g_pos + 1], "4400000000");
    }

    #[test]
    fn test_build_args_with_audio() {
        let audio = audio_config();
        let args =
            build_capture_args(&video_config(), Some(&audio), Path::new("/tmp/out.mp4")).unwrap();

        assert!(args.contains(&"-c:a".to_string()));
        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"-ar".to_string()));
        assert!(!args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_mp4_gets_faststart() {
        let args = build_capture_args(&video_config(), None, Path::new("/tmp/out.mp4")).unwrap();
        assert!(args.contains(&"-movflags".to_string()));

        let mut mkv = video_config();
        mkv.container = ContainerFormat::Mkv;
        let args = build_capture_args(&mkv, None, Path::new("/tmp/out.mkv")).unwrap();
        assert!(!args.contains(&"-movflags".to_string()));
    }

    #[test]
    fn test_container_codec_compatibility() {
        let factory = FfmpegPipelineFactory::new();

        let mp4_h264 = video_config();
        assert!(factory.can_encode(&mp4_h264, None));
        assert!(factory.can_encode(&mp4_h264, Some(&audio_config())));

        // Opus does not go into mp4
        let mut opus = audio_config();
        opus.codec = AudioCodec::Opus;
        assert!(!factory.can_encode(&mp4_h264, Some(&opus)));

        // H.264 does not go into webm
        let mut webm_h264 = video_config();
        webm_h264.container = ContainerFormat::Webm;
        assert!(!factory.can_encode(&webm_h264, None));

        // AV1 + Opus in webm is fine
        let mut webm_av1 = video_config();
        webm_av1.container = ContainerFormat::Webm;
        webm_av1.codec = VideoCodec::Av1;
        assert!(factory.can_encode(&webm_av1, Some(&opus)));

        // mkv takes everything
        let mut mkv = video_config();
        mkv.container = ContainerFormat::Mkv;
        mkv.codec = VideoCodec::Hevc;
        assert!(factory.can_encode(&mkv, Some(&audio_config())));
    }

    #[test]
    fn test_encoder_names() {
        assert_eq!(video_encoder_name(VideoCodec::H264), "libx264");
        assert_eq!(video_encoder_name(VideoCodec::Hevc), "libx265");
        assert_eq!(video_encoder_name(VideoCodec::Av1), "libaom-av1");
        assert_eq!(audio_encoder_name(AudioCodec::Opus), "libopus");
    }

    struct NoopObserver;

    impl PipelineObserver for NoopObserver {
        fn on_start(&self) {}
        fn on_progress(&self, _elapsed_micros: u64) {}
        fn on_stop(&self, _error: Option<PipelineError>) {}
    }

    #[tokio::test]
    async fn test_stop_before_start_wins() {
        use crate::display::VirtualDisplay;

        let factory = FfmpegPipelineFactory::new();
        let video = video_config();
        let display = VirtualDisplay::new(1, "test-display", 1920, 1080, 1, true);

        let pipeline = factory
            .create(PipelineSpec {
                video: &video,
                audio: None,
                display: &display,
                output_path: Path::new("/tmp/out.mp4"),
                observer: Arc::new(NoopObserver),
            })
            .unwrap();

        // A stop that lands first must keep a later start from spawning.
        pipeline.stop();
        assert!(pipeline.start().is_err());
    }
}
