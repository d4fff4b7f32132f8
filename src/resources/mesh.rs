use bytemuck::{Pod, Zeroable};

/// Interleaved vertex record shared by every render pass.
///
/// | location | member        | format      | offset |
/// |----------|---------------|-------------|--------|
/// | 0        | `position`    | `vec4<f32>` | 0      |
/// | 1        | `color`       | `vec4<f32>` | 16     |
/// | 2        | `uv`          | `vec2<f32>` | 32     |
/// | 3        | `normal`      | `vec3<f32>` | 40     |
/// | 4        | `mesh_id`     | `u32`       | 52     |
/// | 5        | `barycentric` | `vec3<f32>` | 56     |
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [f32; 4],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub mesh_id: u32,
    pub barycentric: [f32; 3],
}

impl Vertex {
    pub const ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
        0 => Float32x4,
        1 => Float32x4,
        2 => Float32x2,
        3 => Float32x3,
        4 => Uint32,
        5 => Float32x3
    ];

    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    #[must_use]
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    #[must_use]
    pub fn new(position: [f32; 4], color: [f32; 4], uv: [f32; 2]) -> Self {
        Self {
            position,
            color,
            uv,
            normal: [0.0, 0.0, 1.0],
            mesh_id: 0,
            barycentric: [0.0; 3],
        }
    }
}

/// Triangle list of vertices produced by a mesh builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub id: u32,
    pub vertices: Vec<Vertex>,
}

impl Mesh {
    #[must_use]
    pub fn new(id: u32, vertices: Vec<Vertex>) -> Self {
        Self { id, vertices }
    }

    /// Two triangles covering clip space, uv origin at the top left.
    #[must_use]
    pub fn fullscreen_quad() -> Self {
        let white = [1.0; 4];
        let corner = |x: f32, y: f32| Vertex::new([x, y, 0.0, 1.0], white, [(x + 1.0) * 0.5, (1.0 - y) * 0.5]);
        let mut vertices = vec![
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
        ];
        assign_barycentrics(&mut vertices);
        Self::new(0, vertices)
    }
}

/// Concatenates meshes into one vertex stream, stamping each vertex with
/// its mesh id.
#[must_use]
pub fn flatten_meshes(meshes: &[Mesh]) -> Vec<Vertex> {
    let mut out = Vec::with_capacity(meshes.iter().map(|m| m.vertices.len()).sum());
    for mesh in meshes {
        out.extend(mesh.vertices.iter().map(|v| Vertex { mesh_id: mesh.id, ..*v }));
    }
    out
}

fn assign_barycentrics(vertices: &mut [Vertex]) {
    const CORNERS: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    for (i, v) in vertices.iter_mut().enumerate() {
        v.barycentric = CORNERS[i % 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_record_is_68_bytes() {
        assert_eq!(Vertex::STRIDE, 68);
        assert_eq!(Vertex::ATTRIBUTES[4].offset, 52);
        assert_eq!(Vertex::ATTRIBUTES[5].offset, 56);
    }

    #[test]
    fn flatten_stamps_mesh_ids() {
        let quad = Mesh::fullscreen_quad();
        let meshes = [Mesh::new(3, quad.vertices.clone()), Mesh::new(4, quad.vertices[..3].to_vec())];
        let vertices = flatten_meshes(&meshes);
        assert_eq!(vertices.len(), 9);
        assert_eq!(vertices[0].mesh_id, 3);
        assert_eq!(vertices[8].mesh_id, 4);
    }
}
