//! Light bounding volumes.
//!
//! Every frame the lighting pass rebuilds one mesh per group holding a cube
//! or pyramid around each light. Each vertex carries the full light
//! parameters so one draw lights every covered pixel.
//!
//! Volumes are built in cone space: `z` along the light direction, `x` an
//! arbitrary perpendicular and `y = z × x`. Triangles wind counter-clockwise
//! seen from inside the volume.

use ember_gpu_shared::uniforms::PointLightVertex;
use glam::{Mat3, Vec3};
use log::{debug, warn};

use crate::device::{BufferId, BufferKind, Geometry, RenderDevice};
use crate::error::{GfxError, Result};
use crate::scene::LightInstance;

/// Lights at or above this outer-cone cosine get a pyramid.
pub const PYRAMID_MIN_OUTER_COS: f32 = 0.4;
/// Slack around a volume within which the camera counts as inside.
pub const INSIDE_EPSILON: f32 = 1.0;

pub const CUBE_VERTEXES: usize = 8;
pub const CUBE_INDEXES: usize = 36;
pub const PYRAMID_VERTEXES: usize = 5;
pub const PYRAMID_INDEXES: usize = 18;

/// 16-bit indices address at most this many worst-case lights per group.
pub const MAX_LIGHTS: usize = (u16::MAX as usize + 1) / CUBE_VERTEXES;

const STRIDE: u64 = std::mem::size_of::<PointLightVertex>() as u64;

/// Corner `i` of the box has `x = max` if bit 0 is set, `y` bit 1, `z` bit 2.
const CUBE_TRIANGLES: [u16; CUBE_INDEXES] = [
    0, 1, 3, 0, 3, 2, // z min
    4, 7, 5, 4, 6, 7, // z max
    0, 2, 6, 0, 6, 4, // x min
    1, 7, 3, 1, 5, 7, // x max
    0, 4, 5, 0, 5, 1, // y min
    2, 7, 6, 2, 3, 7, // y max
];

/// Apex 0, base corners 1..=4 ordered like the cube's z-max face.
const PYRAMID_TRIANGLES: [u16; PYRAMID_INDEXES] = [
    0, 1, 2, // y min
    0, 4, 3, // y max
    0, 3, 1, // x min
    0, 2, 4, // x max
    1, 4, 2, 1, 3, 4, // base
];

pub fn use_pyramid(outer_cos: f32) -> bool {
    outer_cos >= PYRAMID_MIN_OUTER_COS
}

/// The volume of one light, in cone space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightVolume {
    /// Columns are the cone-space axes in world space.
    pub basis: Mat3,
    pub origin: Vec3,
    /// Bounding cuboid of the volume.
    pub min: Vec3,
    pub max: Vec3,
    pub pyramid: bool,
}

impl LightVolume {
    pub fn new(light: &LightInstance) -> Self {
        let z = light.direction.normalize_or(Vec3::Y);
        let x = z.any_orthonormal_vector();
        let y = z.cross(x);
        let range = light.range;
        let pyramid = use_pyramid(light.outer_cos);
        let (min, max) = if pyramid {
            // Scaling the footprint at `range` by 1/outer_cos puts the far cap
            // at z = range with the apex on the light.
            let sin = (1.0 - light.outer_cos * light.outer_cos).max(0.0).sqrt();
            let half = range * sin / light.outer_cos;
            (Vec3::new(-half, -half, 0.0), Vec3::new(half, half, range))
        } else {
            let cs_z_min = range * light.outer_cos.min(0.0);
            (Vec3::new(-range, -range, cs_z_min), Vec3::splat(range))
        };
        Self {
            basis: Mat3::from_cols(x, y, z),
            origin: light.position,
            min,
            max,
            pyramid,
        }
    }

    pub fn to_cone_space(&self, world: Vec3) -> Vec3 {
        self.basis.transpose() * (world - self.origin)
    }

    pub fn to_world(&self, cone: Vec3) -> Vec3 {
        self.origin + self.basis * cone
    }

    /// Camera within the cuboid grown by [`INSIDE_EPSILON`] on every face.
    pub fn contains_camera(&self, camera: Vec3) -> bool {
        let p = self.to_cone_space(camera);
        let eps = Vec3::splat(INSIDE_EPSILON);
        p.cmpge(self.min - eps).all() && p.cmple(self.max + eps).all()
    }

    /// Cone-space corners of the mesh.
    pub fn corners(&self) -> Vec<Vec3> {
        let (lo, hi) = (self.min, self.max);
        if self.pyramid {
            vec![
                Vec3::ZERO,
                Vec3::new(lo.x, lo.y, hi.z),
                Vec3::new(hi.x, lo.y, hi.z),
                Vec3::new(lo.x, hi.y, hi.z),
                Vec3::new(hi.x, hi.y, hi.z),
            ]
        } else {
            (0..CUBE_VERTEXES)
                .map(|i| {
                    Vec3::new(
                        if i & 1 != 0 { hi.x } else { lo.x },
                        if i & 2 != 0 { hi.y } else { lo.y },
                        if i & 4 != 0 { hi.z } else { lo.z },
                    )
                })
                .collect()
        }
    }

    pub fn triangles(&self) -> &'static [u16] {
        if self.pyramid {
            &PYRAMID_TRIANGLES
        } else {
            &CUBE_TRIANGLES
        }
    }
}

/// Bounds-checked cursor over the vertex and index space reserved by
/// [`PointLightsGeometry::begin_lights`].
#[derive(Debug, Default)]
struct LightWriter {
    vertexes: Vec<PointLightVertex>,
    indexes: Vec<u16>,
    vertex_limit: usize,
    index_limit: usize,
}

impl LightWriter {
    fn reset(&mut self, lights: usize) {
        self.vertexes.clear();
        self.indexes.clear();
        self.vertex_limit = lights * CUBE_VERTEXES;
        self.index_limit = lights * CUBE_INDEXES;
        self.vertexes.reserve(self.vertex_limit);
        self.indexes.reserve(self.index_limit);
    }

    fn write_vertex(&mut self, v: PointLightVertex) -> Result<()> {
        if self.vertexes.len() >= self.vertex_limit {
            return Err(GfxError::Engine(format!(
                "light vertex buffer overrun ({} reserved)",
                self.vertex_limit
            )));
        }
        self.vertexes.push(v);
        Ok(())
    }

    fn write_index(&mut self, i: u16) -> Result<()> {
        if self.indexes.len() >= self.index_limit {
            return Err(GfxError::Engine(format!(
                "light index buffer overrun ({} reserved)",
                self.index_limit
            )));
        }
        self.indexes.push(i);
        Ok(())
    }
}

/// Dynamic mesh of light volumes for one group (camera inside or outside).
///
/// GPU buffers are sized for the worst case of every light being a cube and
/// only ever grow.
#[derive(Debug)]
pub struct PointLightsGeometry {
    label: &'static str,
    buffers: Option<(BufferId, BufferId)>,
    capacity: usize,
    writer: LightWriter,
    open: bool,
    vertexes_used: usize,
    indexes_used: usize,
}

impl PointLightsGeometry {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            buffers: None,
            capacity: 0,
            writer: LightWriter::default(),
            open: false,
            vertexes_used: 0,
            indexes_used: 0,
        }
    }

    /// Reserve room for `count` lights and start a new build.
    pub fn begin_lights(&mut self, device: &mut dyn RenderDevice, count: usize) -> Result<()> {
        let count = if count > MAX_LIGHTS {
            warn!("{}: {count} lights requested, capped at {MAX_LIGHTS}", self.label);
            MAX_LIGHTS
        } else {
            count
        };
        if count > self.capacity || self.buffers.is_none() {
            let lights = count.max(self.capacity).max(1);
            let vb = device.create_buffer(
                BufferKind::Vertex,
                (lights * CUBE_VERTEXES) as u64 * STRIDE,
            )?;
            let index_bytes = (lights * CUBE_INDEXES * 2) as u64;
            let ib = match device.create_buffer(BufferKind::Index, index_bytes) {
                Ok(ib) => ib,
                Err(e) => {
                    device.destroy_buffer(vb);
                    return Err(e);
                }
            };
            if let Some((old_vb, old_ib)) = self.buffers.replace((vb, ib)) {
                device.destroy_buffer(old_vb);
                device.destroy_buffer(old_ib);
            }
            debug!("{}: light buffers grown to {lights} lights", self.label);
            self.capacity = lights;
        }
        self.writer.reset(count);
        self.vertexes_used = 0;
        self.indexes_used = 0;
        self.open = true;
        Ok(())
    }

    fn append(&mut self, light: &LightInstance, volume: &LightVolume) -> Result<()> {
        if !self.open {
            return Err(GfxError::Engine(format!("{}: light added outside begin/end", self.label)));
        }
        let corners = volume.corners();
        let base = self.writer.vertexes.len();
        if base + corners.len() > self.writer.vertex_limit
            || self.writer.indexes.len() + volume.triangles().len() > self.writer.index_limit
        {
            return Err(GfxError::Engine(format!(
                "{}: more lights than reserved by begin_lights",
                self.label
            )));
        }
        for corner in corners {
            self.writer.write_vertex(PointLightVertex {
                position: volume.to_world(corner).into(),
                light_direction: light.direction.into(),
                diffuse: light.diffuse.into(),
                specular: light.specular.into(),
                light_position: light.position.into(),
                light_params: [light.inner_cos, light.outer_cos, light.range],
            })?;
        }
        for &i in volume.triangles() {
            self.writer.write_index(base as u16 + i)?;
        }
        Ok(())
    }

    pub fn cube_light(&mut self, light: &LightInstance, volume: &LightVolume) -> Result<()> {
        debug_assert!(!volume.pyramid);
        self.append(light, volume)
    }

    pub fn pyramid_light(&mut self, light: &LightInstance, volume: &LightVolume) -> Result<()> {
        debug_assert!(volume.pyramid);
        self.append(light, volume)
    }

    /// Upload what was written and record the counts.
    pub fn end_lights(&mut self, device: &mut dyn RenderDevice) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.vertexes_used = self.writer.vertexes.len();
        self.indexes_used = self.writer.indexes.len();
        if self.indexes_used == 0 {
            return Ok(());
        }
        let (vb, ib) = self
            .buffers
            .ok_or_else(|| GfxError::Engine(format!("{}: no light buffers", self.label)))?;
        device.write_buffer(vb, 0, bytemuck::cast_slice(&self.writer.vertexes))?;
        device.write_buffer(ib, 0, bytemuck::cast_slice(&self.writer.indexes))?;
        Ok(())
    }

    pub fn vertexes_used(&self) -> usize {
        self.vertexes_used
    }

    pub fn indexes_used(&self) -> usize {
        self.indexes_used
    }

    /// Worst-case lights the GPU buffers can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn geometry(&self) -> Option<Geometry> {
        let (vertices, indices) = self.buffers?;
        (self.indexes_used > 0).then_some(Geometry::Indexed {
            vertices,
            indices,
            index_count: self.indexes_used as u32,
        })
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some((vb, ib)) = self.buffers.take() {
            device.destroy_buffer(vb);
            device.destroy_buffer(ib);
        }
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;

    fn light(position: Vec3, direction: Vec3, outer_cos: f32, range: f32) -> LightInstance {
        LightInstance {
            position,
            direction,
            diffuse: Vec3::ONE,
            specular: Vec3::ONE,
            inner_cos: (outer_cos + 0.1).min(1.0),
            outer_cos,
            range,
        }
    }

    /// Inside test for the actual pyramid, not just its cuboid.
    fn pyramid_contains(volume: &LightVolume, cone: Vec3) -> bool {
        let eps = 1e-3;
        let half = volume.max.x;
        let range = volume.max.z;
        cone.z >= -eps
            && cone.z <= range + eps
            && cone.x.abs() <= half * cone.z / range + eps
            && cone.y.abs() <= half * cone.z / range + eps
    }

    #[test]
    fn test_shape_selection() {
        for i in 0..=40 {
            let outer = -1.0 + i as f32 * 0.05;
            let volume = LightVolume::new(&light(Vec3::ZERO, Vec3::Y, outer, 10.0));
            assert_eq!(volume.pyramid, outer >= 0.4, "outer {outer}");
        }
    }

    #[test]
    fn test_volume_contains_cone_of_influence() {
        let dirs = [Vec3::Y, Vec3::new(1.0, -2.0, 0.5).normalize(), Vec3::NEG_Z];
        for dir in dirs {
            for outer in [-1.0, -0.5, 0.0, 0.2, 0.39, 0.4, 0.6, 0.9] {
                let l = light(Vec3::new(3.0, 4.0, -1.0), dir, outer, 12.0);
                let volume = LightVolume::new(&l);
                let half_angle = outer.acos();
                for ai in 0..=8 {
                    let theta = half_angle * ai as f32 / 8.0;
                    for pi in 0..12 {
                        let phi = std::f32::consts::TAU * pi as f32 / 12.0;
                        for di in 1..=4 {
                            let d = l.range * di as f32 / 4.0;
                            let cone = Vec3::new(
                                d * theta.sin() * phi.cos(),
                                d * theta.sin() * phi.sin(),
                                d * theta.cos(),
                            );
                            let world = volume.to_world(cone);
                            let back = volume.to_cone_space(world);
                            let inside = if volume.pyramid {
                                pyramid_contains(&volume, back)
                            } else {
                                back.cmpge(volume.min - 1e-3).all()
                                    && back.cmple(volume.max + 1e-3).all()
                            };
                            assert!(inside, "outer {outer} theta {theta} d {d}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_cone_z_min() {
        let wide = LightVolume::new(&light(Vec3::ZERO, Vec3::Y, -0.5, 8.0));
        assert_eq!(wide.min.z, -4.0);
        let forward = LightVolume::new(&light(Vec3::ZERO, Vec3::Y, 0.2, 8.0));
        assert_eq!(forward.min.z, 0.0);
    }

    #[test]
    fn test_inside_outside_partition() {
        let l = light(Vec3::new(5.0, 5.0, 5.0), Vec3::X, 0.0, 4.0);
        let volume = LightVolume::new(&l);
        // Cuboid in cone space is [-4, 4] x [-4, 4] x [0, 4], grown by 1.
        let inside = [l.position, l.position + Vec3::X * 4.5, l.position - Vec3::X * 0.5];
        let outside = [l.position - Vec3::X * 1.5, l.position + Vec3::Y * 7.5, Vec3::ZERO];
        for p in inside {
            assert!(volume.contains_camera(p), "{p}");
        }
        for p in outside {
            assert!(!volume.contains_camera(p), "{p}");
        }
    }

    #[test]
    fn test_winding_faces_inward() {
        for outer in [0.0, 0.7] {
            let volume = LightVolume::new(&light(Vec3::ZERO, Vec3::Z, outer, 10.0));
            let corners = volume.corners();
            let centre = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
            for tri in volume.triangles().chunks(3) {
                let [a, b, c] = [0, 1, 2].map(|k| corners[tri[k] as usize]);
                let normal = (b - a).cross(c - a);
                assert!(normal.dot(centre - a) > 0.0, "{tri:?}");
            }
        }
    }

    #[test]
    fn test_begin_end_without_lights_is_empty() {
        let mut device = RecordingDevice::new(8, 8);
        let mut geometry = PointLightsGeometry::new("outside");
        geometry.begin_lights(&mut device, 10).unwrap();
        geometry.end_lights(&mut device).unwrap();
        assert_eq!(geometry.vertexes_used(), 0);
        assert_eq!(geometry.indexes_used(), 0);
        assert!(geometry.geometry().is_none());
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut device = RecordingDevice::new(8, 8);
        let mut geometry = PointLightsGeometry::new("inside");
        geometry.begin_lights(&mut device, 20).unwrap();
        geometry.end_lights(&mut device).unwrap();
        let (vb, _) = geometry.buffers.unwrap();
        let size = device.buffer_size(vb).unwrap();
        geometry.begin_lights(&mut device, 3).unwrap();
        geometry.end_lights(&mut device).unwrap();
        assert_eq!(geometry.capacity(), 20);
        assert_eq!(geometry.buffers.unwrap().0, vb);
        assert_eq!(device.buffer_size(vb).unwrap(), size);
        geometry.begin_lights(&mut device, 21).unwrap();
        assert!(geometry.capacity() >= 21);
        assert_eq!(device.buffers.len(), 2);
    }

    #[test]
    fn test_counts_and_overrun() {
        let mut device = RecordingDevice::new(8, 8);
        let mut geometry = PointLightsGeometry::new("outside");
        geometry.begin_lights(&mut device, 2).unwrap();
        let spot = light(Vec3::ZERO, Vec3::Y, 0.8, 5.0);
        let omni = light(Vec3::ZERO, Vec3::Y, -1.0, 5.0);
        geometry.pyramid_light(&spot, &LightVolume::new(&spot)).unwrap();
        geometry.cube_light(&omni, &LightVolume::new(&omni)).unwrap();
        assert!(geometry.cube_light(&omni, &LightVolume::new(&omni)).is_err());
        geometry.end_lights(&mut device).unwrap();
        assert_eq!(geometry.vertexes_used(), PYRAMID_VERTEXES + CUBE_VERTEXES);
        assert_eq!(geometry.indexes_used(), PYRAMID_INDEXES + CUBE_INDEXES);
        assert!(geometry.vertexes_used() <= 2 * CUBE_VERTEXES);
    }
}
