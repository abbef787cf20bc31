//! Looping video thumbnails from evenly spaced frames
//!
//! A `VideoSource` reports stream geometry and hands out individual frames by
//! index. `make_loop` samples `frame_count` indices uniformly over the stream,
//! resamples each decoded frame and assembles them into an infinitely looping
//! GIF. The production source shells out to ffprobe for metadata and to ffmpeg
//! for single-frame rawvideo decodes.

use crate::error::GenerationError;
use crate::generate::{scaled_size, Rendered};
use anyhow::{bail, Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, DynamicImage, Frame, RgbImage};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// A decodable video stream
pub trait VideoSource {
    fn path(&self) -> &Path;

    /// Native `(width, height)` of the video stream
    fn dimensions(&self) -> (u32, u32);

    fn frame_count(&self) -> u64;

    /// Decode the frame at `index` in RGB channel order
    fn read_frame(&mut self, index: u64) -> Result<RgbImage>;
}

/// Indices `floor(i * total_frames / frame_count)` for `i in 0..frame_count`.
///
/// Streams shorter than `frame_count` repeat indices, so the loop always has
/// `frame_count` entries.
pub fn sample_indices(total_frames: u64, frame_count: u32) -> Vec<u64> {
    let count = u128::from(frame_count.max(1));
    (0..count)
        .map(|i| (i * u128::from(total_frames) / count) as u64)
        .collect()
}

/// Sample a video into a looping GIF whose frames fit inside `max_dimension`
pub fn make_loop<S: VideoSource + ?Sized>(
    source: &mut S,
    max_dimension: u32,
    frame_count: u32,
    frame_delay_ms: u32,
) -> Result<Rendered, GenerationError> {
    let total_frames = source.frame_count();
    if total_frames == 0 {
        return Err(GenerationError::NoFrames {
            path: source.path().to_path_buf(),
        });
    }

    let (width, height) = source.dimensions();
    let (target_width, target_height) = scaled_size(width, height, max_dimension);

    let mut frames = Vec::new();
    // Repeated indices reuse the previous decode, including a failed one
    let mut previous: Option<(u64, Option<RgbImage>)> = None;
    for index in sample_indices(total_frames, frame_count) {
        let frame = match previous.take() {
            Some((last, frame)) if last == index => frame,
            _ => match source.read_frame(index) {
                Ok(frame) if frame.dimensions() == (target_width, target_height) => Some(frame),
                Ok(frame) => Some(imageops::resize(
                    &frame,
                    target_width,
                    target_height,
                    FilterType::Lanczos3,
                )),
                Err(e) => {
                    warn!("Skipping frame {} of {}: {:#}", index, source.path().display(), e);
                    None
                }
            },
        };
        if let Some(frame) = &frame {
            frames.push(frame.clone());
        }
        previous = Some((index, frame));
    }

    if frames.is_empty() {
        return Err(GenerationError::DecodeFailure {
            path: source.path().to_path_buf(),
        });
    }

    debug!(
        "Sampled {} frames from {} at {}x{}",
        frames.len(),
        source.path().display(),
        target_width,
        target_height
    );

    let bytes = encode_gif(frames, frame_delay_ms)
        .map_err(|e| GenerationError::encode(source.path(), e))?;

    Ok(Rendered {
        bytes,
        width: target_width,
        height: target_height,
    })
}

/// Encode frames as an infinitely looping GIF with equal per-frame delay
fn encode_gif(frames: Vec<RgbImage>, frame_delay_ms: u32) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buffer, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(frame_delay_ms, 1);
        encoder.encode_frames(frames.into_iter().map(|frame| {
            Frame::from_parts(DynamicImage::ImageRgb8(frame).to_rgba8(), 0, 0, delay)
        }))?;
    }
    Ok(buffer)
}

/// Video stream probed through ffprobe and decoded frame by frame through ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg_path: String,
    info: StreamInfo,
}

/// Stream metadata extracted from ffprobe's JSON output
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub frame_rate: f64,
    pub duration_ms: Option<u64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

impl FfmpegSource {
    /// Probe `path`; any failure to read stream metadata is an unreadable source
    pub fn open(path: &Path, ffprobe_path: &str, ffmpeg_path: &str) -> Result<Self, GenerationError> {
        if !path.is_file() {
            return Err(GenerationError::unreadable(path, "file does not exist"));
        }

        let info = probe(path, ffprobe_path).map_err(|e| GenerationError::unreadable(path, format!("{:#}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            ffmpeg_path: ffmpeg_path.to_string(),
            info,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.info.duration_ms
    }
}

impl VideoSource for FfmpegSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn read_frame(&mut self, index: u64) -> Result<RgbImage> {
        let (width, height) = self.dimensions();
        let timestamp = index as f64 / self.info.frame_rate;
        let frame_bytes = width as usize * height as usize * 3;

        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-nostdin", "-noautorotate"])
            .arg("-ss")
            .arg(format!("{:.3}", timestamp))
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to run ffmpeg on {}", self.path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffmpeg failed at {:.3}s: {}", timestamp, stderr.trim());
        }

        if output.stdout.len() < frame_bytes {
            bail!(
                "Short frame at {:.3}s: got {} bytes, expected {}",
                timestamp,
                output.stdout.len(),
                frame_bytes
            );
        }

        let mut data = output.stdout;
        data.truncate(frame_bytes);
        RgbImage::from_raw(width, height, data).context("Frame buffer does not match stream dimensions")
    }
}

fn probe(path: &Path, ffprobe_path: &str) -> Result<StreamInfo> {
    let output = Command::new(ffprobe_path)
        .args(["-v", "error", "-select_streams", "v:0", "-count_packets"])
        .args([
            "-show_entries",
            "stream=width,height,nb_frames,nb_read_packets,avg_frame_rate,r_frame_rate,duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run ffprobe on {}", path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffprobe failed for {}: {}", path.display(), stderr.trim());
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

/// Interpret ffprobe JSON for the first video stream.
///
/// Frame count prefers the container's `nb_frames`, then the counted packets,
/// then `duration * fps`.
pub fn parse_probe(json: &str) -> Result<StreamInfo> {
    let parsed: ProbeOutput = serde_json::from_str(json).context("Invalid ffprobe output")?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .context("No video stream found")?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => bail!("Video stream has no dimensions"),
    };

    let frame_rate = [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_rate)
        .unwrap_or(25.0);

    let duration_secs = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let counted = |field: Option<&str>| field.and_then(|n| n.parse::<u64>().ok()).filter(|n| *n > 0);
    let frame_count = counted(stream.nb_frames.as_deref())
        .or_else(|| counted(stream.nb_read_packets.as_deref()))
        .or_else(|| duration_secs.map(|d| (d * frame_rate).floor() as u64))
        .unwrap_or(0);

    Ok(StreamInfo {
        width,
        height,
        frame_count,
        frame_rate,
        duration_ms: duration_secs.map(|d| (d * 1000.0).floor() as u64),
    })
}

/// Parse an ffprobe rational such as `30000/1001`; zero or malformed rates yield `None`
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
