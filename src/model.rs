/// A ground control point tying a raster location to a georeferenced one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gcp {
    /// Unique identifier, often numeric.
    pub id: String,
    /// Informational message or empty string.
    pub info: String,
    /// Pixel (x) location on the raster.
    pub pixel: f64,
    /// Line (y) location on the raster.
    pub line: f64,
    /// X position in georeferenced space.
    pub x: f64,
    /// Y position in georeferenced space.
    pub y: f64,
    /// Elevation, or zero if not known.
    pub z: f64,
}

impl Gcp {
    pub fn new(id: impl Into<String>, pixel: f64, line: f64, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            info: String::new(),
            pixel,
            line,
            x,
            y,
            z: 0.0,
        }
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    pub fn pixel_line(&self) -> (f64, f64) {
        (self.pixel, self.line)
    }

    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Copy with raster coordinates divided by the given ratios.
    pub fn scaled(&self, ratio_x: f64, ratio_y: f64) -> Self {
        Self {
            pixel: self.pixel / ratio_x,
            line: self.line / ratio_y,
            ..self.clone()
        }
    }
}
