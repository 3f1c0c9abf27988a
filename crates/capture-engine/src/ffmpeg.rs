//! Encoder backend driving an `ffmpeg` child process.
//!
//! Raw RGBA frames go in on stdin, paced onto the output frame rate by
//! their timestamps. A tapped audio track is served as little-endian `f32`
//! PCM on a loopback socket that ffmpeg reads as its second input.
//! Container bytes come out on stdout and are cut into chunks on the
//! session's timeslice.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use vizrec_common::{VizrecError, VizrecResult};

use crate::audio_tap::{AudioFormat, AudioSamples, AudioTrack};
use crate::encoder::{
    EncodedChunk, EncoderBackend, EncoderParams, EncoderSession, EncoderState, FramePacer,
    VideoStream,
};

const READ_BUFFER: usize = 64 * 1024;

/// Audio bitrate used when the session does not name one.
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;

/// Encoders and muxers reported by the ffmpeg binary.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCapabilities {
    pub encoders: HashSet<String>,
    pub muxers: HashSet<String>,
}

impl FfmpegCapabilities {
    /// Run `binary -encoders` and `binary -muxers`. A missing binary yields
    /// empty capabilities.
    pub async fn detect(binary: &Path) -> Self {
        let caps = Self {
            encoders: parse_listing(&run_listing(binary, "-encoders").await),
            muxers: parse_listing(&run_listing(binary, "-muxers").await),
        };
        tracing::debug!(
            encoders = caps.encoders.len(),
            muxers = caps.muxers.len(),
            "Detected ffmpeg capabilities"
        );
        caps
    }
}

async fn run_listing(binary: &Path, flag: &str) -> String {
    let output = Command::new(binary)
        .args(["-hide_banner", flag])
        .stdin(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).into_owned(),
        Err(e) => {
            tracing::warn!(binary = %binary.display(), error = %e, "ffmpeg not runnable");
            String::new()
        }
    }
}

/// Names from an `ffmpeg -encoders`/`-muxers` listing. Entries follow the
/// `---` separator line as `<flags> <name[,alias]> <description>`.
fn parse_listing(listing: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    let mut in_body = false;
    for line in listing.lines() {
        let trimmed = line.trim();
        if !in_body {
            in_body = trimmed.starts_with("--");
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let (Some(_flags), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        names.extend(name.split(',').map(str::to_string));
    }
    names
}

/// How a MIME type maps onto ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePlan {
    /// ffmpeg muxer name.
    pub muxer: &'static str,
    /// ffmpeg video encoder name.
    pub encoder: &'static str,
    /// ffmpeg audio encoder used when a track is muxed.
    pub audio_encoder: &'static str,
    container: String,
    video_codec: String,
    audio_codec: String,
}

impl EncodePlan {
    /// Map `mime_type` to a muxer plus video and audio encoders. Without a
    /// codec list the container's usual pair is used.
    pub fn for_mime(mime_type: &str) -> Option<Self> {
        let mut parts = mime_type.split(';').map(str::trim);
        let container = parts.next()?.to_ascii_lowercase();
        let codecs: Vec<String> = parts
            .filter_map(|p| p.strip_prefix("codecs="))
            .flat_map(|list| list.trim_matches('"').split(','))
            .map(|c| c.trim().to_ascii_lowercase())
            .collect();

        let (muxer, default_video, default_audio) = match container.as_str() {
            "video/mp4" => ("mp4", "avc1", "mp4a.40.2"),
            "video/webm" => ("webm", "vp8", "opus"),
            "video/ogg" => ("ogg", "theora", "vorbis"),
            _ => return None,
        };

        let video_codec = if codecs.is_empty() {
            default_video.to_string()
        } else {
            codecs.iter().find(|c| video_encoder_for(c).is_some())?.clone()
        };
        let audio_codec = codecs
            .iter()
            .find(|c| audio_encoder_for(c).is_some())
            .cloned()
            .unwrap_or_else(|| default_audio.to_string());
        let encoder = video_encoder_for(&video_codec)?;
        let audio_encoder = audio_encoder_for(&audio_codec)?;
        let compatible = matches!(
            (muxer, encoder),
            ("mp4", "libx264") | ("webm", "libvpx" | "libvpx-vp9") | ("ogg", "libtheora")
        ) && matches!(
            (muxer, audio_encoder),
            ("mp4", "aac" | "libopus") | ("webm" | "ogg", "libopus" | "libvorbis")
        );
        if !compatible {
            return None;
        }

        Some(Self {
            muxer,
            encoder,
            audio_encoder,
            container,
            video_codec,
            audio_codec,
        })
    }

    /// Encoding actually produced, with or without the audio codec.
    pub fn reported_mime(&self, with_audio: bool) -> String {
        if with_audio {
            format!("{};codecs={},{}", self.container, self.video_codec, self.audio_codec)
        } else {
            format!("{};codecs={}", self.container, self.video_codec)
        }
    }
}

fn video_encoder_for(codec: &str) -> Option<&'static str> {
    if codec.starts_with("avc1") || codec == "h264" {
        Some("libx264")
    } else if codec == "vp9" || codec.starts_with("vp09") {
        Some("libvpx-vp9")
    } else if codec == "vp8" || codec.starts_with("vp08") {
        Some("libvpx")
    } else if codec == "theora" {
        Some("libtheora")
    } else {
        None
    }
}

fn audio_encoder_for(codec: &str) -> Option<&'static str> {
    if codec == "opus" {
        Some("libopus")
    } else if codec.starts_with("mp4a") || codec == "aac" {
        Some("aac")
    } else if codec == "vorbis" {
        Some("libvorbis")
    } else {
        None
    }
}

/// PCM input ffmpeg reads alongside the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInput {
    pub url: String,
    pub format: AudioFormat,
}

/// Command line for encoding `params` with `plan`, reading frames from
/// stdin and writing to stdout. With `audio`, PCM from that input is muxed
/// in as well.
pub fn ffmpeg_args(
    params: &EncoderParams,
    plan: &EncodePlan,
    audio: Option<&AudioInput>,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
        "-s",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("{}x{}", params.width, params.height));
    args.extend(["-r".to_string(), params.fps.to_string()]);
    args.extend(["-i", "pipe:0"].map(String::from));

    match audio {
        Some(input) => {
            args.extend(["-thread_queue_size", "512", "-f", "f32le", "-ar"].map(String::from));
            args.push(input.format.sample_rate.to_string());
            args.push("-ac".to_string());
            args.push(input.format.channels.to_string());
            args.extend(["-i".to_string(), input.url.clone()]);
            args.extend(["-map", "0:v", "-map", "1:a"].map(String::from));
        }
        None => args.push("-an".to_string()),
    }

    args.extend(["-c:v", plan.encoder].map(String::from));
    args.extend(["-b:v".to_string(), params.video_bits_per_second.to_string()]);
    args.extend(["-pix_fmt", "yuv420p"].map(String::from));
    match plan.encoder {
        "libx264" => {
            args.extend(["-preset", "veryfast", "-tune", "zerolatency"].map(String::from))
        }
        "libvpx" | "libvpx-vp9" => {
            args.extend(["-deadline", "realtime", "-cpu-used", "8"].map(String::from))
        }
        _ => {}
    }

    if audio.is_some() {
        let bitrate = params.audio_bits_per_second.unwrap_or(DEFAULT_AUDIO_BITRATE);
        args.extend(["-c:a", plan.audio_encoder].map(String::from));
        args.extend(["-b:a".to_string(), bitrate.to_string()]);
    }
    if plan.muxer == "mp4" {
        // Fragmented so the stream can be written to a pipe.
        args.extend(
            ["-movflags", "frag_keyframe+empty_moov+default_base_moof"].map(String::from),
        );
    }
    args.extend(["-f", plan.muxer, "pipe:1"].map(String::from));
    args
}

/// [`EncoderBackend`] backed by an ffmpeg binary.
#[derive(Debug)]
pub struct FfmpegEncoderBackend {
    binary: PathBuf,
    caps: FfmpegCapabilities,
}

impl FfmpegEncoderBackend {
    /// Detect what `binary` can encode. Support queries never touch the
    /// binary again.
    pub async fn detect(binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        let caps = FfmpegCapabilities::detect(&binary).await;
        Self { binary, caps }
    }

    /// Backend with already-known capabilities.
    pub fn with_capabilities(binary: impl Into<PathBuf>, caps: FfmpegCapabilities) -> Self {
        Self {
            binary: binary.into(),
            caps,
        }
    }

    pub fn capabilities(&self) -> &FfmpegCapabilities {
        &self.caps
    }

    /// Whether the binary answered capability detection.
    pub fn is_available(&self) -> bool {
        !self.caps.muxers.is_empty()
    }

    fn audio_source(&self, plan: &EncodePlan, track: &dyn AudioTrack) -> Option<AudioSource> {
        if !self.caps.encoders.contains(plan.audio_encoder) {
            tracing::warn!(
                encoder = plan.audio_encoder,
                track = track.label(),
                "ffmpeg lacks the audio encoder; recording video only"
            );
            return None;
        }
        let Some(samples) = track.take_samples() else {
            tracing::warn!(track = track.label(), "Audio track has no sample stream");
            return None;
        };
        Some(AudioSource {
            format: track.format(),
            samples,
        })
    }
}

impl EncoderBackend for FfmpegEncoderBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        let Some(plan) = EncodePlan::for_mime(mime_type) else {
            return false;
        };
        self.caps.muxers.contains(plan.muxer) && self.caps.encoders.contains(plan.encoder)
    }

    fn create_session(
        &self,
        params: EncoderParams,
        video: VideoStream,
        audio: Option<Arc<dyn AudioTrack>>,
        chunks: mpsc::UnboundedSender<EncodedChunk>,
    ) -> VizrecResult<Box<dyn EncoderSession>> {
        let plan = EncodePlan::for_mime(&params.mime_type).ok_or_else(|| {
            VizrecError::unsupported(format!("ffmpeg cannot encode {}", params.mime_type))
        })?;
        let audio = audio.and_then(|track| self.audio_source(&plan, track.as_ref()));
        Ok(Box::new(FfmpegSession {
            binary: self.binary.clone(),
            params,
            plan,
            with_audio: audio.is_some(),
            video: Some(video),
            audio,
            chunks: Some(chunks),
            state: EncoderState::Inactive,
            child: None,
            writer: None,
            audio_feed: None,
            audio_stop: None,
            reader: None,
            stderr: None,
        }))
    }
}

struct AudioSource {
    format: AudioFormat,
    samples: AudioSamples,
}

/// Loopback listener ffmpeg connects to for its PCM input.
struct AudioFeed {
    url: String,
    listener: TcpListener,
}

impl AudioFeed {
    fn bind() -> VizrecResult<Self> {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        Ok(Self {
            url: format!("tcp://{addr}"),
            listener: TcpListener::from_std(listener)?,
        })
    }

    /// Serve `samples` to the first connection. Returns the number of
    /// samples written.
    fn spawn(self, samples: AudioSamples, mut stop: oneshot::Receiver<()>) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let stream = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "ffmpeg audio input not accepted");
                        return 0;
                    }
                },
                _ = &mut stop => return 0,
            };
            write_samples(samples, stream, stop).await
        })
    }
}

/// Copy PCM buffers into `out` as little-endian `f32` until the track ends
/// or `stop` fires.
async fn write_samples<W: AsyncWrite + Unpin>(
    mut samples: AudioSamples,
    mut out: W,
    mut stop: oneshot::Receiver<()>,
) -> u64 {
    let mut written = 0u64;
    let mut bytes = Vec::new();
    loop {
        let buffer = tokio::select! {
            biased;
            _ = &mut stop => break,
            next = samples.recv() => match next {
                Some(buffer) => buffer,
                None => break,
            },
        };
        bytes.clear();
        bytes.extend(buffer.iter().flat_map(|s| s.to_le_bytes()));
        if let Err(e) = out.write_all(&bytes).await {
            tracing::warn!(error = %e, "ffmpeg audio input closed");
            break;
        }
        written += buffer.len() as u64;
    }
    let _ = out.shutdown().await;
    written
}

struct FfmpegSession {
    binary: PathBuf,
    params: EncoderParams,
    plan: EncodePlan,
    with_audio: bool,
    video: Option<VideoStream>,
    audio: Option<AudioSource>,
    chunks: Option<mpsc::UnboundedSender<EncodedChunk>>,
    state: EncoderState,
    child: Option<Child>,
    writer: Option<JoinHandle<u64>>,
    audio_feed: Option<JoinHandle<u64>>,
    audio_stop: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

#[async_trait::async_trait]
impl EncoderSession for FfmpegSession {
    fn start(&mut self, timeslice: Duration) -> VizrecResult<()> {
        if self.state != EncoderState::Inactive {
            return Err(VizrecError::encoder("ffmpeg session already started"));
        }
        let (Some(mut video), Some(chunks)) = (self.video.take(), self.chunks.take()) else {
            return Err(VizrecError::encoder("ffmpeg session has no inputs"));
        };

        let audio = match self.audio.take() {
            Some(source) => Some((AudioFeed::bind()?, source)),
            None => None,
        };
        let audio_input = audio.as_ref().map(|(feed, source)| AudioInput {
            url: feed.url.clone(),
            format: source.format,
        });

        let args = ffmpeg_args(&self.params, &self.plan, audio_input.as_ref());
        tracing::debug!(?args, "Running ffmpeg");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VizrecError::encoder(format!("Failed to start ffmpeg: {e}")))?;
        tracing::info!(
            pid = ?child.id(),
            encoder = self.plan.encoder,
            muxer = self.plan.muxer,
            audio = self.with_audio,
            "ffmpeg process started"
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VizrecError::encoder("Failed to capture ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VizrecError::encoder("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VizrecError::encoder("Failed to capture ffmpeg stderr"))?;

        let (width, height, fps) = (self.params.width, self.params.height, self.params.fps);
        self.writer = Some(tokio::spawn(async move {
            let mut pacer = FramePacer::new(fps);
            let mut written = 0u64;
            'frames: while let Some(frame) = video.recv().await {
                if (frame.width, frame.height) != (width, height) {
                    tracing::debug!(
                        width = frame.width,
                        height = frame.height,
                        "Frame size mismatch; skipped"
                    );
                    continue;
                }
                for _ in 0..pacer.slots_for(frame.pts_ms) {
                    if let Err(e) = stdin.write_all(&frame.data).await {
                        tracing::warn!(error = %e, "ffmpeg stdin closed");
                        break 'frames;
                    }
                    written += 1;
                }
            }
            // Dropping stdin signals end of input.
            let _ = stdin.shutdown().await;
            written
        }));

        if let Some((feed, source)) = audio {
            let (stop_tx, stop_rx) = oneshot::channel();
            self.audio_feed = Some(feed.spawn(source.samples, stop_rx));
            self.audio_stop = Some(stop_tx);
        }

        self.reader = Some(tokio::spawn(async move {
            let mut pending = Vec::new();
            let mut buf = vec![0u8; READ_BUFFER];
            let mut flush = tokio::time::interval(timeslice.max(Duration::from_millis(10)));
            flush.tick().await;
            loop {
                tokio::select! {
                    read = stdout.read(&mut buf) => match read {
                        Ok(0) => break,
                        Ok(n) => pending.extend_from_slice(&buf[..n]),
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed reading ffmpeg output");
                            break;
                        }
                    },
                    _ = flush.tick() => {
                        if !pending.is_empty() {
                            let _ = chunks.send(EncodedChunk::new(std::mem::take(&mut pending)));
                        }
                    }
                }
            }
            if !pending.is_empty() {
                let _ = chunks.send(EncodedChunk::new(pending));
            }
        }));

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        self.stderr = Some(tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        }));

        self.child = Some(child);
        self.state = EncoderState::Recording;
        Ok(())
    }

    fn state(&self) -> EncoderState {
        self.state
    }

    fn mime_type(&self) -> Option<String> {
        Some(self.plan.reported_mime(self.with_audio))
    }

    fn has_audio(&self) -> bool {
        self.with_audio
    }

    async fn finish(&mut self) -> VizrecResult<()> {
        self.chunks = None;
        self.video = None;
        self.audio = None;
        if self.state != EncoderState::Recording {
            self.state = EncoderState::Stopped;
            return Ok(());
        }
        self.state = EncoderState::Stopped;

        if let Some(writer) = self.writer.take() {
            match writer.await {
                Ok(frames) => tracing::debug!(frames, "ffmpeg video input closed"),
                Err(e) => tracing::warn!(error = %e, "ffmpeg writer task failed"),
            }
        }
        // ffmpeg only finishes once both inputs hit end of stream.
        if let Some(stop) = self.audio_stop.take() {
            let _ = stop.send(());
        }
        if let Some(feed) = self.audio_feed.take() {
            match feed.await {
                Ok(samples) => tracing::debug!(samples, "ffmpeg audio input closed"),
                Err(e) => tracing::warn!(error = %e, "ffmpeg audio task failed"),
            }
        }
        let status = match self.child.take() {
            Some(mut child) => Some(
                child
                    .wait()
                    .await
                    .map_err(|e| VizrecError::encoder(format!("Failed to wait on ffmpeg: {e}")))?,
            ),
            None => None,
        };
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        let stderr_output = match self.stderr.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|_| "<failed to join stderr reader>".to_string()),
            None => String::new(),
        };

        match status {
            Some(status) if !status.success() => Err(VizrecError::encoder(format!(
                "ffmpeg exited with {status}: {}",
                stderr_output.trim()
            ))),
            _ => Ok(()),
        }
    }
}
