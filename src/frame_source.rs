// frame_source.rs — 帧源：后台线程解码，渲染线程非阻塞轮询

use crate::error::FrameError;
use crate::texture::PreparedFrame;
use image::codecs::gif::GifDecoder;
use image::io::Reader as ImageReader;
use image::{AnimationDecoder, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

/// A continuously updating image polled once per render tick.
pub trait FrameSource {
    /// Returns the newest frame produced since the last poll, `Ok(None)` when
    /// nothing new is ready. Must never block; frames arrive already fitted
    /// to the texture limit with their mip levels.
    fn poll_frame(&mut self) -> Result<Option<PreparedFrame>, FrameError>;

    /// Size of the most recently delivered frame.
    fn dimensions(&self) -> Option<(u32, u32)>;

    fn describe(&self) -> String;
}

/// Never produces a frame; the placeholder stays on screen.
#[derive(Debug, Default)]
pub struct EmptySource;

impl FrameSource for EmptySource {
    fn poll_frame(&mut self) -> Result<Option<PreparedFrame>, FrameError> {
        Ok(None)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }

    fn describe(&self) -> String {
        "no source".to_string()
    }
}

/// Picks a source by file extension: `.gif` plays as an animated clip,
/// anything else is decoded as a still image. Frames are scaled to fit
/// `max_dimension` on the decoder thread.
pub fn open_source(path: &Path, max_dimension: u32) -> Box<dyn FrameSource> {
    let animated = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gif"))
        .unwrap_or(false);

    if animated {
        Box::new(AnimatedSource::spawn(path.to_path_buf(), max_dimension))
    } else {
        Box::new(StillImageSource::spawn(path.to_path_buf(), max_dimension))
    }
}

type FrameMessage = Result<PreparedFrame, FrameError>;

/// Consumer half shared by the threaded sources.
struct FrameChannel {
    rx: Receiver<FrameMessage>,
    label: String,
    endless: bool,
    delivered: bool,
    dimensions: Option<(u32, u32)>,
    failure: Option<FrameError>,
}

impl FrameChannel {
    fn new(rx: Receiver<FrameMessage>, label: String, endless: bool) -> Self {
        Self {
            rx,
            label,
            endless,
            delivered: false,
            dimensions: None,
            failure: None,
        }
    }

    fn poll(&mut self) -> Result<Option<PreparedFrame>, FrameError> {
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }

        // 只保留最新一帧，跳过积压的旧帧
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(Ok(frame)) => latest = Some(frame),
                Ok(Err(e)) => {
                    self.failure = Some(e);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.endless || (!self.delivered && latest.is_none()) {
                        self.failure = Some(FrameError::Disconnected(self.label.clone()));
                    }
                    break;
                }
            }
        }

        match latest {
            Some(frame) => {
                self.delivered = true;
                self.dimensions = Some(frame.dimensions());
                Ok(Some(frame))
            }
            None => match &self.failure {
                Some(e) => Err(e.clone()),
                None => Ok(None),
            },
        }
    }
}

/// A still panorama decoded once on a background thread.
pub struct StillImageSource {
    channel: FrameChannel,
}

impl StillImageSource {
    pub fn spawn(path: PathBuf, max_dimension: u32) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let label = path.display().to_string();

        let spawned = thread::Builder::new()
            .name("still-decoder".into())
            .spawn(move || {
                log::info!("decoding image {:?} in background", path);
                let result = decode_image(&path).map(|img| {
                    log::info!("image decoded: {}x{}", img.width(), img.height());
                    PreparedFrame::prepare(img, max_dimension)
                });
                // 接收端已被替换时忽略
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            log::error!("cannot start decoder thread for {label}: {e}");
        }

        Self {
            channel: FrameChannel::new(rx, label, false),
        }
    }
}

impl FrameSource for StillImageSource {
    fn poll_frame(&mut self) -> Result<Option<PreparedFrame>, FrameError> {
        self.channel.poll()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.channel.dimensions
    }

    fn describe(&self) -> String {
        self.channel.label.clone()
    }
}

/// Shortest delay honoured between clip frames.
const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

/// Frames the producer may run ahead of the render loop.
const CLIP_QUEUE_DEPTH: usize = 2;

/// An animated GIF played in a loop, paced by its own frame delays.
pub struct AnimatedSource {
    channel: FrameChannel,
}

impl AnimatedSource {
    pub fn spawn(path: PathBuf, max_dimension: u32) -> Self {
        let (tx, rx) = mpsc::sync_channel(CLIP_QUEUE_DEPTH);
        let label = path.display().to_string();

        let spawned = thread::Builder::new()
            .name("clip-decoder".into())
            .spawn(move || play_clip(&path, max_dimension, &tx));
        if let Err(e) = spawned {
            log::error!("cannot start decoder thread for {label}: {e}");
        }

        Self {
            channel: FrameChannel::new(rx, label, true),
        }
    }
}

impl FrameSource for AnimatedSource {
    fn poll_frame(&mut self) -> Result<Option<PreparedFrame>, FrameError> {
        self.channel.poll()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.channel.dimensions
    }

    fn describe(&self) -> String {
        self.channel.label.clone()
    }
}

fn open_file(path: &Path) -> Result<BufReader<File>, FrameError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| FrameError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn decode_error(path: &Path, e: impl std::fmt::Display) -> FrameError {
    FrameError::Decode {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn decode_image(path: &Path) -> Result<RgbaImage, FrameError> {
    let reader = open_file(path)?;
    let img = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(image::ImageError::IoError)
        .and_then(|mut r| {
            r.no_limits();
            r.decode()
        })
        .map_err(|e| decode_error(path, e))?;
    Ok(img.to_rgba8())
}

/// Producer loop: decodes the clip front to back, forever, until the
/// receiving source is dropped.
fn play_clip(path: &Path, max_dimension: u32, tx: &SyncSender<FrameMessage>) {
    log::info!("playing clip {:?}", path);

    loop {
        let decoder = match open_file(path)
            .and_then(|r| GifDecoder::new(r).map_err(|e| decode_error(path, e)))
        {
            Ok(d) => d,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        let mut produced = 0usize;
        for frame in decoder.into_frames() {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    let _ = tx.send(Err(decode_error(path, e)));
                    return;
                }
            };

            let started = Instant::now();
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay = Duration::from_secs_f64(numer as f64 / denom.max(1) as f64 / 1000.0)
                .max(MIN_FRAME_DELAY);

            let prepared = PreparedFrame::prepare(frame.into_buffer(), max_dimension);
            if tx.send(Ok(prepared)).is_err() {
                log::debug!("clip {:?} no longer watched, stopping decoder", path);
                return;
            }
            produced += 1;

            if let Some(rest) = delay.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        if produced == 0 {
            let _ = tx.send(Err(decode_error(path, "clip has no frames")));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("panosphere-{}-{}", std::process::id(), name))
    }

    fn poll_until_frame(source: &mut dyn FrameSource) -> PreparedFrame {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match source.poll_frame() {
                Ok(Some(frame)) => return frame,
                Ok(None) => {}
                Err(e) => panic!("unexpected failure: {e}"),
            }
            assert!(Instant::now() < deadline, "no frame from {}", source.describe());
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn poll_until_error(source: &mut dyn FrameSource) -> FrameError {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match source.poll_frame() {
                Err(e) => return e,
                Ok(Some(_)) => panic!("unexpected frame"),
                Ok(None) => {}
            }
            assert!(Instant::now() < deadline, "no failure reported");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn empty_source_never_yields() {
        let mut source = EmptySource;
        for _ in 0..3 {
            assert_eq!(source.poll_frame(), Ok(None));
        }
        assert_eq!(source.dimensions(), None);
    }

    #[test]
    fn still_image_is_delivered_once() {
        let path = temp_path("still.png");
        RgbaImage::from_pixel(8, 4, Rgba([200, 100, 50, 255]))
            .save(&path)
            .unwrap();

        let mut source = open_source(&path, 8192);
        let frame = poll_until_frame(source.as_mut());
        assert_eq!(frame.dimensions(), (8, 4));
        assert_eq!(frame.base().get_pixel(3, 2), &Rgba([200, 100, 50, 255]));
        assert_eq!(source.dimensions(), Some((8, 4)));

        for _ in 0..5 {
            assert_eq!(source.poll_frame(), Ok(None));
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn decoder_thread_delivers_frames_ready_for_upload() {
        let path = temp_path("large.png");
        RgbaImage::from_pixel(256, 128, Rgba([40, 80, 120, 255]))
            .save(&path)
            .unwrap();

        let mut source = open_source(&path, 64);
        let frame = poll_until_frame(source.as_mut());
        assert_eq!(frame.dimensions(), (64, 32));
        assert_eq!(frame.level_count(), 7);
        assert_eq!(source.dimensions(), Some((64, 32)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_fails_the_same_way_every_poll() {
        let mut source = open_source(&temp_path("does-not-exist.jpg"), 8192);
        let first = poll_until_error(source.as_mut());
        assert!(matches!(first, FrameError::Io { .. }));
        assert_eq!(source.poll_frame(), Err(first.clone()));
        assert_eq!(source.poll_frame(), Err(first));
        assert_eq!(source.dimensions(), None);
    }

    #[test]
    fn undecodable_file_reports_decode_error() {
        let path = temp_path("garbage.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let mut source = open_source(&path, 8192);
        assert!(matches!(
            poll_until_error(source.as_mut()),
            FrameError::Decode { .. }
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clip_loops_through_its_frames() {
        let path = temp_path("clip.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            let frames = [[255u8, 0, 0, 255], [0, 255, 0, 255]].map(|px| {
                Frame::from_parts(
                    RgbaImage::from_pixel(4, 2, Rgba(px)),
                    0,
                    0,
                    Delay::from_numer_denom_ms(20, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }

        let mut source = open_source(&path, 8192);
        let mut received = 0;
        while received < 5 {
            let frame = poll_until_frame(source.as_mut());
            assert_eq!(frame.dimensions(), (4, 2));
            received += 1;
        }
        assert_eq!(source.dimensions(), Some((4, 2)));
        drop(source);
        let _ = std::fs::remove_file(&path);
    }
}
