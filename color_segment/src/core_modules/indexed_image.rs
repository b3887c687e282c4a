/// A per-pixel palette index buffer, stored row-major in one flat arena.
///
/// Index 0 is background; `i > 0` refers to color set `i - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl IndexedImage {
    /// An all-background image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    /// Wraps an existing row-major buffer. Returns `None` if the length is wrong.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width * height).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Row `y` as a mutable slice of `width` indices.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.width;
        &mut self.pixels[start..start + self.width]
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, index: u8) {
        self.pixels[y * self.width + x] = index;
    }

    /// Number of non-background pixels.
    pub fn foreground_count(&self) -> usize {
        self.pixels.iter().filter(|&&index| index != 0).count()
    }
}
