//! Geometry Cache
//!
//! Vertex data is stored as raw bytes plus a stride; the cache never
//! interprets the vertex layout. Typed vertex slices are converted with
//! `bytemuck`.

use bytemuck::Pod;

use crate::cache::{ResourceCache, ResourceKind};
use crate::device::RenderDevice;
use crate::errors::{Error, Result};

/// Cache of device vertex/index buffers.
pub type GeometryCache<D> = ResourceCache<D, Geometries>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(data) => data.len(),
            Self::U32(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct GeometryDescriptor {
    pub vertices: Vec<u8>,
    pub vertex_stride: u32,
    pub indices: Option<Indices>,
    pub topology: wgpu::PrimitiveTopology,
}

impl GeometryDescriptor {
    /// Triangle-list geometry from typed vertices.
    #[must_use]
    pub fn from_vertices<V: Pod>(vertices: &[V]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: size_of::<V>() as u32,
            indices: None,
            topology: wgpu::PrimitiveTopology::TriangleList,
        }
    }

    #[must_use]
    pub fn with_indices(mut self, indices: Indices) -> Self {
        self.indices = Some(indices);
        self
    }

    #[must_use]
    pub fn with_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            return 0;
        }
        (self.vertices.len() / self.vertex_stride as usize) as u32
    }

    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |i| i.len() as u32)
    }
}

/// Marker for [`GeometryCache`].
pub struct Geometries;

impl<D: RenderDevice> ResourceKind<D> for Geometries {
    const KIND: &'static str = "geometry";
    type Descriptor = GeometryDescriptor;
    type Resource = D::Geometry;
    type Env = ();

    fn validate(descriptor: &GeometryDescriptor) -> Result<()> {
        let kind = <Self as ResourceKind<D>>::KIND;
        if descriptor.vertex_stride == 0 {
            return Err(Error::invalid(kind, "vertex stride is zero"));
        }
        if descriptor.vertices.len() % descriptor.vertex_stride as usize != 0 {
            return Err(Error::invalid(
                kind,
                format!(
                    "{} vertex bytes is not a multiple of stride {}",
                    descriptor.vertices.len(),
                    descriptor.vertex_stride
                ),
            ));
        }

        let vertex_count = descriptor.vertex_count();
        let out_of_range = match &descriptor.indices {
            Some(Indices::U16(data)) => data.iter().any(|&i| u32::from(i) >= vertex_count),
            Some(Indices::U32(data)) => data.iter().any(|&i| i >= vertex_count),
            None => false,
        };
        if out_of_range {
            return Err(Error::invalid(kind, "index references a missing vertex"));
        }
        Ok(())
    }

    fn create(
        device: &mut D,
        descriptor: &GeometryDescriptor,
        _: &(),
        label: &str,
    ) -> Result<D::Geometry> {
        device.create_geometry(descriptor, label)
    }

    fn destroy(device: &mut D, geometry: D::Geometry) {
        device.destroy_geometry(geometry);
    }
}

/// The empty geometry every missing geometry handle resolves to.
pub(crate) fn create_fallback<D: RenderDevice>(device: &mut D) -> Result<D::Geometry> {
    let empty = GeometryDescriptor {
        vertices: Vec::new(),
        vertex_stride: 4,
        indices: None,
        topology: wgpu::PrimitiveTopology::TriangleList,
    };
    device.create_geometry(&empty, "Fallback Geometry")
}
