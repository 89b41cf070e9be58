use std::path::Path;

use crate::shared::frame::{Frame, PixelFormat};

pub(crate) type DecodeError = Box<dyn std::error::Error + Send + Sync>;

/// An open ffmpeg input plus the decoder and RGB scaler for its best video
/// stream. Yields one frame per [`DecodeSession::next_frame`] call.
///
/// File inputs end: once the demuxer runs dry the decoder is flushed and the
/// session reports `done`. Live inputs (capture devices) never end; running
/// out of packets just means nothing is ready yet.
pub(crate) struct DecodeSession {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    fps: f64,
    video_stream_index: usize,
    frame_index: usize,
    live: bool,
    flushing: bool,
    done: bool,
}

// Safety: a DecodeSession is owned by exactly one frame source, which is only
// driven from one task at a time. The raw ffmpeg pointers are never shared.
unsafe impl Send for DecodeSession {}

impl DecodeSession {
    pub fn open_file(path: &Path) -> Result<Self, DecodeError> {
        ffmpeg_next::init()?;
        let ictx = ffmpeg_next::format::input(path)?;
        Self::from_input(ictx, false)
    }

    /// Opens a capture device through an ffmpeg input device (`v4l2`,
    /// `avfoundation`, ...).
    pub fn open_device(
        format_name: &str,
        url: &str,
        options: ffmpeg_next::Dictionary,
    ) -> Result<Self, DecodeError> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let format = ffmpeg_next::device::input::video()
            .find(|f| f.name() == format_name)
            .ok_or_else(|| format!("input device format '{format_name}' is not available"))?;

        let ctx = ffmpeg_next::format::open_with(
            url,
            &ffmpeg_next::format::Format::Input(format),
            options,
        )?;
        match ctx {
            ffmpeg_next::format::context::Context::Input(ictx) => Self::from_input(ictx, true),
            ffmpeg_next::format::context::Context::Output(_) => {
                Err(format!("{url} did not open as an input").into())
            }
        }
    }

    fn from_input(
        ictx: ffmpeg_next::format::context::Input,
        live: bool,
    ) -> Result<Self, DecodeError> {
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;

        let video_stream_index = stream.index();
        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            ictx,
            decoder,
            scaler,
            width,
            height,
            fps,
            video_stream_index,
            frame_index: 0,
            live,
            flushing: false,
            done: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// True once a file input has been fully drained.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decodes the next frame.
    ///
    /// `Ok(None)` means end of stream for file inputs and "nothing ready" for
    /// live inputs.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.done {
            return Ok(None);
        }

        if let Some(frame) = self.try_receive()? {
            return Ok(Some(frame));
        }

        if self.flushing {
            self.done = true;
            return Ok(None);
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                if self.live {
                    return Ok(None);
                }
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(frame) = self.try_receive()? {
                    return Ok(Some(frame));
                }
                self.done = true;
                return Ok(None);
            };

            if stream.index() != self.video_stream_index {
                continue;
            }

            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
        }
    }

    /// Runs [`DecodeSession::next_frame`] on the blocking pool, since demuxing
    /// a capture device waits in a syscall until a packet arrives. The session
    /// is handed back unless the read panicked.
    pub async fn read_off_runtime(self) -> (Option<Self>, Result<Option<Frame>, DecodeError>) {
        let joined = tokio::task::spawn_blocking(move || {
            let mut session = self;
            let result = session.next_frame();
            (session, result)
        })
        .await;

        match joined {
            Ok((session, result)) => (Some(session), result),
            Err(e) => (None, Err(format!("decode task failed: {e}").into())),
        }
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, DecodeError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut rgb_frame)?;

        let pixels = extract_rgb_pixels(&rgb_frame, self.width, self.height);
        let frame = Frame::new(
            pixels,
            self.width,
            self.height,
            PixelFormat::Rgb8,
            self.frame_index,
        );
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

/// Copies pixel data from an ffmpeg frame into a tightly packed RGB buffer,
/// dropping the per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}
