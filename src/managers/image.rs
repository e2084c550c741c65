//! Image Cache
//!
//! Images come from three sources:
//!
//! | Source | Layout | Pixels |
//! |--------|--------|--------|
//! | [`ImageSource::Files`] | 2D (one path) or cube (six paths) | decoded on the render thread |
//! | [`ImageSource::Pixels`] | 2D / 2D array | supplied by the caller |
//! | [`ImageSource::Attachment`] | 2D | none, render-target storage |
//!
//! File decoding uses the `image` crate and always expands to RGBA8, so file
//! sources must request an RGBA8 format.

use std::path::PathBuf;

use crate::cache::{ResourceCache, ResourceKind};
use crate::device::{ImageUpload, RenderDevice};
use crate::errors::{Error, Result};

/// Cache of device images.
pub type ImageCache<D> = ResourceCache<D, Images>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    D2,
    /// Six faces in +X, -X, +Y, -Y, +Z, -Z order.
    Cube,
}

impl ImageLayout {
    #[inline]
    #[must_use]
    pub const fn layer_count(self) -> usize {
        match self {
            Self::D2 => 1,
            Self::Cube => 6,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Files {
        paths: Vec<PathBuf>,
        layout: ImageLayout,
    },
    /// Tightly packed texels, `layers` images stacked back to back.
    Pixels {
        width: u32,
        height: u32,
        layers: u32,
        data: Vec<u8>,
    },
    /// Uninitialized storage for render-target attachments.
    Attachment { width: u32, height: u32 },
}

#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub source: ImageSource,
    pub format: wgpu::TextureFormat,
    pub filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
    pub mip_levels: u32,
}

impl ImageDescriptor {
    fn with_source(source: ImageSource, format: wgpu::TextureFormat) -> Self {
        Self {
            source,
            format,
            filter: wgpu::FilterMode::Linear,
            wrap: wgpu::AddressMode::Repeat,
            mip_levels: 1,
        }
    }

    /// A 2D image decoded from one file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_source(
            ImageSource::Files {
                paths: vec![path.into()],
                layout: ImageLayout::D2,
            },
            wgpu::TextureFormat::Rgba8UnormSrgb,
        )
    }

    /// A cube map decoded from six face files.
    #[must_use]
    pub fn cube<P: Into<PathBuf>>(faces: impl IntoIterator<Item = P>) -> Self {
        Self::with_source(
            ImageSource::Files {
                paths: faces.into_iter().map(Into::into).collect(),
                layout: ImageLayout::Cube,
            },
            wgpu::TextureFormat::Rgba8UnormSrgb,
        )
    }

    /// A single-layer image from raw texels.
    #[must_use]
    pub fn pixels(width: u32, height: u32, format: wgpu::TextureFormat, data: Vec<u8>) -> Self {
        Self::with_source(
            ImageSource::Pixels {
                width,
                height,
                layers: 1,
                data,
            },
            format,
        )
    }

    /// Render-target storage.
    #[must_use]
    pub fn attachment(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self::with_source(ImageSource::Attachment { width, height }, format)
    }

    #[must_use]
    pub fn with_filter(mut self, filter: wgpu::FilterMode) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_wrap(mut self, wrap: wgpu::AddressMode) -> Self {
        self.wrap = wrap;
        self
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }
}

/// Marker for [`ImageCache`].
pub struct Images;

impl<D: RenderDevice> ResourceKind<D> for Images {
    const KIND: &'static str = "image";
    type Descriptor = ImageDescriptor;
    type Resource = D::Image;
    type Env = ();

    fn validate(descriptor: &ImageDescriptor) -> Result<()> {
        let kind = <Self as ResourceKind<D>>::KIND;
        if descriptor.mip_levels == 0 {
            return Err(Error::invalid(kind, "mip_levels must be at least 1"));
        }

        match &descriptor.source {
            ImageSource::Files { paths, layout } => {
                if paths.len() != layout.layer_count() {
                    return Err(Error::invalid(
                        kind,
                        format!(
                            "{layout:?} layout needs {} path(s), got {}",
                            layout.layer_count(),
                            paths.len()
                        ),
                    ));
                }
                if !matches!(
                    descriptor.format,
                    wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
                ) {
                    return Err(Error::invalid(
                        kind,
                        format!("files decode to RGBA8, not {:?}", descriptor.format),
                    ));
                }
            }
            ImageSource::Pixels {
                width,
                height,
                layers,
                data,
            } => {
                if *width == 0 || *height == 0 || *layers == 0 {
                    return Err(Error::invalid(kind, "pixel image has a zero dimension"));
                }
                let texel = descriptor.format.block_copy_size(None).ok_or_else(|| {
                    Error::invalid(
                        kind,
                        format!("{:?} cannot be uploaded from memory", descriptor.format),
                    )
                })?;
                let expected = u64::from(*width)
                    * u64::from(*height)
                    * u64::from(*layers)
                    * u64::from(texel);
                if data.len() as u64 != expected {
                    return Err(Error::invalid(
                        kind,
                        format!("expected {expected} bytes of pixels, got {}", data.len()),
                    ));
                }
            }
            ImageSource::Attachment { width, height } => {
                if *width == 0 || *height == 0 {
                    return Err(Error::invalid(kind, "attachment has a zero dimension"));
                }
            }
        }
        Ok(())
    }

    fn create(device: &mut D, descriptor: &ImageDescriptor, _: &(), label: &str) -> Result<D::Image> {
        let mut upload = ImageUpload {
            width: 0,
            height: 0,
            layers: 1,
            layout: ImageLayout::D2,
            format: descriptor.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            mip_levels: descriptor.mip_levels,
            filter: descriptor.filter,
            wrap: descriptor.wrap,
            pixels: None,
        };

        match &descriptor.source {
            ImageSource::Files { paths, layout } => {
                let (width, height, pixels) = decode_faces(paths)?;
                upload.width = width;
                upload.height = height;
                upload.layers = layout.layer_count() as u32;
                upload.layout = *layout;
                upload.pixels = Some(pixels.as_slice());
                device.create_image(&upload, label)
            }
            ImageSource::Pixels {
                width,
                height,
                layers,
                data,
            } => {
                upload.width = *width;
                upload.height = *height;
                upload.layers = *layers;
                upload.pixels = Some(data.as_slice());
                device.create_image(&upload, label)
            }
            ImageSource::Attachment { width, height } => {
                upload.width = *width;
                upload.height = *height;
                upload.usage =
                    wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
                device.create_image(&upload, label)
            }
        }
    }

    fn destroy(device: &mut D, image: D::Image) {
        device.destroy_image(image);
    }
}

/// Decodes every path to RGBA8 and stacks the faces. All faces must share one
/// size.
fn decode_faces(paths: &[PathBuf]) -> Result<(u32, u32, Vec<u8>)> {
    let mut size = None;
    let mut pixels = Vec::new();
    for path in paths {
        let face = image::open(path)
            .map_err(|e| Error::ImageDecode(format!("{}: {e}", path.display())))?
            .to_rgba8();
        let dims = face.dimensions();
        match size {
            None => size = Some(dims),
            Some(expected) if expected != dims => {
                return Err(Error::ImageDecode(format!(
                    "{}: face is {}x{}, expected {}x{}",
                    path.display(),
                    dims.0,
                    dims.1,
                    expected.0,
                    expected.1
                )));
            }
            Some(_) => {}
        }
        pixels.extend_from_slice(face.as_raw());
    }
    let (width, height) = size.unwrap_or((0, 0));
    Ok((width, height, pixels))
}

/// The 1x1 magenta image every missing image handle resolves to.
pub(crate) fn create_fallback<D: RenderDevice>(device: &mut D) -> Result<D::Image> {
    const MAGENTA: [u8; 4] = [255, 0, 255, 255];
    let upload = ImageUpload {
        width: 1,
        height: 1,
        layers: 1,
        layout: ImageLayout::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        mip_levels: 1,
        filter: wgpu::FilterMode::Nearest,
        wrap: wgpu::AddressMode::Repeat,
        pixels: Some(&MAGENTA),
    };
    device.create_image(&upload, "Fallback Image")
}
