use ndarray::ArrayView3;

/// Channel layout of a frame's pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Gray8,
}

impl PixelFormat {
    pub fn channels(self) -> u8 {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A single decoded frame: contiguous bytes in row-major order.
///
/// Frames are owned by whoever pulled them from a source. The pipeline hands
/// out borrows to observers and the detector, then drops the frame at the end
/// of the iteration.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    index: usize,
}

impl Frame {
    /// Frames from third-party sources are not validated here; check
    /// [`Frame::is_well_formed`] before indexing pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, index: usize) -> Self {
        Self {
            data,
            width,
            height,
            format,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn channels(&self) -> u8 {
        self.format.channels()
    }

    /// Position of this frame within its source, starting at 0.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True when the frame carries no pixel data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    /// True when the buffer length equals width * height * channels.
    pub fn is_well_formed(&self) -> bool {
        let (h, w, c) = self.shape();
        h.checked_mul(w)
            .and_then(|hw| hw.checked_mul(c))
            .is_some_and(|len| len == self.data.len())
    }

    /// Panics unless [`Frame::is_well_formed`].
    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels() as usize,
        )
    }
}
