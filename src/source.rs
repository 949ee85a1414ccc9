// Collaborators that feed a job: the G-code serializer and the scene renderer.
use image::RgbaImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("G-code serialization failed: {0}")]
    Serialize(String),
    #[error("Renderer unavailable: {0}")]
    Unavailable(String),
}

/// Produces the complete G-code text of the current job.
pub trait GcodeSource: Send + Sync {
    fn serialize(&self) -> Result<String, SourceError>;
}

/// Produces a raster snapshot of the scene that thumbnails are cut from.
pub trait Renderer: Send + Sync {
    fn snapshot(&self) -> Result<RgbaImage, SourceError>;
}

/// Reads G-code from a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GcodeSource for FileSource {
    fn serialize(&self) -> Result<String, SourceError> {
        tracing::info!("Reading G-code file: {}", self.path.display());
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content)
    }
}

/// G-code already held in memory.
#[derive(Debug, Clone)]
pub struct StaticSource(pub String);

impl GcodeSource for StaticSource {
    fn serialize(&self) -> Result<String, SourceError> {
        Ok(self.0.clone())
    }
}

/// Uses a pre-rendered preview image (PNG) as the scene snapshot.
#[derive(Debug, Clone)]
pub struct ImageFileRenderer {
    path: PathBuf,
}

impl ImageFileRenderer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl Renderer for ImageFileRenderer {
    fn snapshot(&self) -> Result<RgbaImage, SourceError> {
        tracing::debug!("Loading scene snapshot from {}", self.path.display());
        Ok(image::open(&self.path)?.to_rgba8())
    }
}

/// In-memory snapshot.
#[derive(Debug, Clone)]
pub struct StaticRenderer(pub RgbaImage);

impl Renderer for StaticRenderer {
    fn snapshot(&self) -> Result<RgbaImage, SourceError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_file_source_reads_gcode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "G28\nG1 X10\n").unwrap();
        let source = FileSource::new(&path);
        assert_eq!(source.serialize().unwrap(), "G28\nG1 X10\n");
    }

    #[test]
    fn test_file_source_missing_file() {
        let source = FileSource::new("does/not/exist.gcode");
        assert!(matches!(source.serialize(), Err(SourceError::Io(_))));
    }

    #[test]
    fn test_image_file_renderer_loads_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.png");
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])).save(&path).unwrap();
        let snapshot = ImageFileRenderer::new(&path).snapshot().unwrap();
        assert_eq!(snapshot.dimensions(), (3, 2));
        assert_eq!(snapshot.get_pixel(2, 1), &Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn test_image_file_renderer_missing_file() {
        let result = ImageFileRenderer::new("missing.png").snapshot();
        assert!(matches!(result, Err(SourceError::Image(_))));
    }
}
