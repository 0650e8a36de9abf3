//! Scene state the pipeline reads: the process-wide environment and the
//! typed node registries.
//!
//! Both are mutated only between frames. A `render` call sees them through
//! shared references.

use bytemuck::Zeroable;
use ember_gpu_shared::uniforms::{GBufferObjectUniforms, MeshVertex, ShadowCasterUniforms};
use glam::{Affine3A, Mat4, Vec3};
use log::debug;

use crate::camera::Camera;
use crate::device::{BufferKind, DrawCall, DrawState, DrawStats, Geometry, RenderDevice};
use crate::error::{GfxError, Result};
use crate::invocations::StageFrame;
use crate::resources::TextureHandle;
use crate::shader_db::{GBUFFER_STATIC, SHADOW_CASTER};

/// Animation time wraps at this many seconds.
pub const ANIM_TIME_MAX: f32 = 3600.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Sun {
    /// Direction the light travels in.
    pub direction: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
}

impl Default for Sun {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.3, 0.4, -1.0).normalize(),
            diffuse: Vec3::splat(1.0),
            specular: Vec3::splat(1.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fog {
    pub colour: Vec3,
    pub density: f32,
}

impl Default for Fog {
    fn default() -> Self {
        Self {
            colour: Vec3::new(0.5, 0.55, 0.6),
            density: 0.0,
        }
    }
}

/// Process-wide lighting state shared by every pipeline instance.
#[derive(Clone, Debug)]
pub struct SceneEnvironment {
    pub sun: Sun,
    pub fog: Fog,
    pub ambient: Vec3,
    pub exposure: f32,
    pub saturation: f32,
    pub env_cubes: [TextureHandle; 2],
    /// 0 shows `env_cubes[0]`, 1 shows `env_cubes[1]`.
    pub env_cube_cross_fade: f32,
    pub colour_grade_lut: TextureHandle,
    pub shadow_noise: TextureHandle,
    anim_time: f32,
}

impl Default for SceneEnvironment {
    fn default() -> Self {
        Self {
            sun: Sun::default(),
            fog: Fog::default(),
            ambient: Vec3::splat(0.1),
            exposure: 1.0,
            saturation: 1.0,
            env_cubes: Default::default(),
            env_cube_cross_fade: 0.0,
            colour_grade_lut: TextureHandle::none(),
            shadow_noise: TextureHandle::none(),
            anim_time: 0.0,
        }
    }
}

impl SceneEnvironment {
    pub fn anim_time(&self) -> f32 {
        self.anim_time
    }

    /// Advance the animation clock, wrapping at [`ANIM_TIME_MAX`].
    pub fn advance_anim_time(&mut self, elapsed: f32) {
        self.anim_time = (self.anim_time + elapsed.max(0.0)).rem_euclid(ANIM_TIME_MAX);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parent {
    Root,
    Node(NodeId),
    /// Follows one bone of a skinned body.
    Bone { body: BodyId, bone: usize },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub local: Affine3A,
    parent: Parent,
    world: Affine3A,
}

impl Node {
    pub fn parent(&self) -> Parent {
        self.parent
    }

    pub fn world(&self) -> Affine3A {
        self.world
    }
}

#[derive(Clone, Debug)]
pub struct Bone {
    /// Must index an earlier bone.
    pub parent: Option<usize>,
    pub local: Affine3A,
}

#[derive(Clone, Debug)]
pub struct Skeleton {
    bones: Vec<Bone>,
    pose: Vec<Affine3A>,
}

impl Skeleton {
    pub fn new(bones: Vec<Bone>) -> Result<Self> {
        for (i, bone) in bones.iter().enumerate() {
            if bone.parent.is_some_and(|p| p >= i) {
                return Err(GfxError::Engine(format!(
                    "bone {i} has parent {:?}, parents must precede children",
                    bone.parent
                )));
            }
        }
        let pose = vec![Affine3A::IDENTITY; bones.len()];
        Ok(Self { bones, pose })
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn set_local(&mut self, bone: usize, local: Affine3A) {
        if let Some(b) = self.bones.get_mut(bone) {
            b.local = local;
        }
    }

    /// Body-space matrix of a bone after the last update.
    pub fn pose(&self, bone: usize) -> Option<Affine3A> {
        self.pose.get(bone).copied()
    }

    fn update(&mut self) {
        for i in 0..self.bones.len() {
            let bone = &self.bones[i];
            self.pose[i] = match bone.parent {
                Some(p) => self.pose[p] * bone.local,
                None => bone.local,
            };
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub node: NodeId,
    pub diffuse: Vec3,
    pub specular: Vec3,
    /// Cosine of the full-intensity cone half-angle.
    pub inner_cos: f32,
    /// Cosine of the zero-intensity cone half-angle.
    pub outer_cos: f32,
    pub range: f32,
    pub enabled: bool,
}

impl Light {
    pub fn omni(node: NodeId, colour: Vec3, range: f32) -> Self {
        Self {
            node,
            diffuse: colour,
            specular: colour,
            inner_cos: -1.0,
            outer_cos: -1.0,
            range,
            enabled: true,
        }
    }

    /// Cone angles are half-angles in degrees.
    pub fn spot(node: NodeId, colour: Vec3, range: f32, inner_deg: f32, outer_deg: f32) -> Self {
        Self {
            inner_cos: inner_deg.to_radians().cos(),
            outer_cos: outer_deg.to_radians().cos(),
            ..Self::omni(node, colour, range)
        }
    }
}

/// A light as the lighting pass consumes it, in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightInstance {
    pub position: Vec3,
    /// Unit axis of the cone.
    pub direction: Vec3,
    pub diffuse: Vec3,
    pub specular: Vec3,
    pub inner_cos: f32,
    pub outer_cos: f32,
    pub range: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BodyMaterial {
    pub diffuse: Vec3,
    pub specular: f32,
    pub gloss: f32,
    /// Depth bias applied when this surface receives shadows.
    pub shadow_cutoff: f32,
}

impl Default for BodyMaterial {
    fn default() -> Self {
        Self {
            diffuse: Vec3::splat(0.8),
            specular: 0.04,
            gloss: 0.5,
            shadow_cutoff: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Body {
    pub node: NodeId,
    pub mesh: Option<MeshId>,
    pub material: BodyMaterial,
    pub cast_shadows: bool,
    pub skeleton: Option<Skeleton>,
}

impl Body {
    pub fn new(node: NodeId, mesh: MeshId) -> Self {
        Self {
            node,
            mesh: Some(mesh),
            material: BodyMaterial::default(),
            cast_shadows: true,
            skeleton: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: crate::device::BufferId,
    pub indices: crate::device::BufferId,
    pub index_count: u32,
    /// Bounding sphere radius about the mesh origin.
    pub radius: f32,
}

/// Typed registries of everything attached to the scene.
///
/// Nodes are only ever parented to nodes created before them, so one pass in
/// id order propagates world transforms.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Option<Node>>,
    lights: Vec<Option<Light>>,
    bodies: Vec<Option<Body>>,
    meshes: Vec<Option<Mesh>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, local: Affine3A, parent: Parent) -> Result<NodeId> {
        match parent {
            Parent::Root => {}
            Parent::Node(p) => {
                self.node(p)?;
            }
            Parent::Bone { body, bone } => {
                let count = self
                    .body(body)?
                    .skeleton
                    .as_ref()
                    .map_or(0, Skeleton::bone_count);
                if bone >= count {
                    return Err(GfxError::Engine(format!(
                        "body {} has no bone {bone}",
                        body.0
                    )));
                }
            }
        }
        self.nodes.push(Some(Node {
            local,
            parent,
            world: local,
        }));
        Ok(NodeId(self.nodes.len() - 1))
    }

    /// Fails while anything still refers to the node.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        let child = self.nodes.iter().flatten().any(|n| n.parent == Parent::Node(id));
        let light = self.lights.iter().flatten().any(|l| l.node == id);
        let body = self.bodies.iter().flatten().any(|b| b.node == id);
        if child || light || body {
            return Err(GfxError::Engine(format!("node {} is still referenced", id.0)));
        }
        self.nodes[id.0] = None;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| GfxError::Engine(format!("no node {}", id.0)))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| GfxError::Engine(format!("no node {}", id.0)))
    }

    pub fn add_light(&mut self, light: Light) -> Result<LightId> {
        self.node(light.node)?;
        self.lights.push(Some(light));
        Ok(LightId(self.lights.len() - 1))
    }

    pub fn remove_light(&mut self, id: LightId) {
        if let Some(slot) = self.lights.get_mut(id.0) {
            *slot = None;
        }
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn add_body(&mut self, body: Body) -> Result<BodyId> {
        self.node(body.node)?;
        if let Some(mesh) = body.mesh {
            self.mesh(mesh)?;
        }
        self.bodies.push(Some(body));
        Ok(BodyId(self.bodies.len() - 1))
    }

    pub fn remove_body(&mut self, id: BodyId) -> Result<()> {
        let follower = self
            .nodes
            .iter()
            .flatten()
            .any(|n| matches!(n.parent, Parent::Bone { body, .. } if body == id));
        if follower {
            return Err(GfxError::Engine(format!("body {} has attached nodes", id.0)));
        }
        if let Some(slot) = self.bodies.get_mut(id.0) {
            *slot = None;
        }
        Ok(())
    }

    pub fn body(&self, id: BodyId) -> Result<&Body> {
        self.bodies
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| GfxError::Engine(format!("no body {}", id.0)))
    }

    pub fn body_mut(&mut self, id: BodyId) -> Result<&mut Body> {
        self.bodies
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| GfxError::Engine(format!("no body {}", id.0)))
    }

    pub fn add_mesh(
        &mut self,
        device: &mut dyn RenderDevice,
        vertices: &[MeshVertex],
        indices: &[u16],
    ) -> Result<MeshId> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let vb = device.create_buffer(BufferKind::Vertex, vertex_bytes.len() as u64)?;
        let ib = device.create_buffer(BufferKind::Index, index_bytes.len() as u64)?;
        device.write_buffer(vb, 0, vertex_bytes)?;
        device.write_buffer(ib, 0, index_bytes)?;
        let radius = vertices
            .iter()
            .map(|v| Vec3::from(v.position).length())
            .fold(0.0, f32::max);
        self.meshes.push(Some(Mesh {
            vertices: vb,
            indices: ib,
            index_count: indices.len() as u32,
            radius,
        }));
        Ok(MeshId(self.meshes.len() - 1))
    }

    pub fn mesh(&self, id: MeshId) -> Result<&Mesh> {
        self.meshes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| GfxError::Engine(format!("no mesh {}", id.0)))
    }

    pub fn release_meshes(&mut self, device: &mut dyn RenderDevice) {
        for mesh in self.meshes.drain(..).flatten() {
            device.destroy_buffer(mesh.vertices);
            device.destroy_buffer(mesh.indices);
        }
    }

    /// Per-frame update: bone poses first, since nodes attached to bones
    /// take their transform from them.
    pub fn update(&mut self) {
        self.update_bones();
        self.update_world_transforms();
    }

    fn update_bones(&mut self) {
        for body in self.bodies.iter_mut().flatten() {
            if let Some(skeleton) = &mut body.skeleton {
                skeleton.update();
            }
        }
    }

    fn update_world_transforms(&mut self) {
        for i in 0..self.nodes.len() {
            let Some(node) = &self.nodes[i] else { continue };
            let parent_world = match node.parent {
                Parent::Root => Affine3A::IDENTITY,
                Parent::Node(p) => self.world_of(p),
                Parent::Bone { body, bone } => {
                    let body = self.bodies.get(body.0).and_then(Option::as_ref);
                    match body {
                        Some(b) => {
                            let pose = b
                                .skeleton
                                .as_ref()
                                .and_then(|s| s.pose(bone))
                                .unwrap_or(Affine3A::IDENTITY);
                            self.world_of(b.node) * pose
                        }
                        None => Affine3A::IDENTITY,
                    }
                }
            };
            if let Some(node) = &mut self.nodes[i] {
                node.world = parent_world * node.local;
            }
        }
    }

    fn world_of(&self, id: NodeId) -> Affine3A {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .map_or(Affine3A::IDENTITY, |n| n.world)
    }

    /// Enabled lights whose range sphere touches the camera frustum.
    pub fn lights_in_frustum(&self, camera: &Camera) -> Vec<LightInstance> {
        let lights: Vec<LightInstance> = self
            .lights
            .iter()
            .flatten()
            .filter(|l| l.enabled && l.range > 0.0)
            .map(|l| {
                let world = self.world_of(l.node);
                LightInstance {
                    position: world.translation.into(),
                    direction: world.transform_vector3(Vec3::Y).normalize_or(Vec3::Y),
                    diffuse: l.diffuse,
                    specular: l.specular,
                    inner_cos: l.inner_cos,
                    outer_cos: l.outer_cos,
                    range: l.range,
                }
            })
            .filter(|l| camera.sphere_visible(l.position, l.range))
            .collect();
        debug!("{} lights in frustum", lights.len());
        lights
    }

    fn visible_bodies<'a>(
        &'a self,
        visible: impl Fn(Vec3, f32) -> bool + 'a,
    ) -> impl Iterator<Item = (&'a Body, &'a Mesh, Affine3A)> + 'a {
        self.bodies.iter().flatten().filter_map(move |body| {
            let mesh = self.meshes.get(body.mesh?.0)?.as_ref()?;
            let world = self.world_of(body.node);
            let scale = world
                .matrix3
                .x_axis
                .length()
                .max(world.matrix3.y_axis.length())
                .max(world.matrix3.z_axis.length());
            visible(world.translation.into(), mesh.radius * scale).then_some((body, mesh, world))
        })
    }

    /// Opaque bodies through the reference G-buffer material.
    pub fn draw_gbuffer(&self, frame: &mut StageFrame<'_>) -> Result<()> {
        let camera = frame.camera;
        let view_proj = camera.view_proj().to_cols_array_2d();
        let pos = camera.position();
        let fwd = camera.forward();
        for (body, mesh, world) in self.visible_bodies(|c, r| camera.sphere_visible(c, r)) {
            let m = &body.material;
            let uniforms = GBufferObjectUniforms {
                world: Mat4::from(world).to_cols_array_2d(),
                view_proj,
                camera_pos: [pos.x, pos.y, pos.z, camera.far()],
                camera_forward: [fwd.x, fwd.y, fwd.z, 0.0],
                diffuse: [m.diffuse.x, m.diffuse.y, m.diffuse.z, 1.0],
                surface: [m.specular, m.gloss, m.shadow_cutoff, 0.0],
            };
            frame.draw(&DrawCall {
                shader: GBUFFER_STATIC,
                state: DrawState::OPAQUE,
                uniforms: bytemuck::bytes_of(&uniforms),
                textures: &[],
                geometry: Geometry::Indexed {
                    vertices: mesh.vertices,
                    indices: mesh.indices,
                    index_count: mesh.index_count,
                },
                viewport: None,
            })?;
        }
        Ok(())
    }

    /// Shadow casters into the open depth-only pass.
    pub fn draw_shadow_casters(
        &self,
        device: &mut dyn RenderDevice,
        view_proj: Mat4,
    ) -> Result<DrawStats> {
        let mut stats = DrawStats::default();
        for (body, mesh, world) in self.visible_bodies(|_, _| true) {
            if !body.cast_shadows {
                continue;
            }
            let mut uniforms = ShadowCasterUniforms::zeroed();
            uniforms.world_view_proj = (view_proj * Mat4::from(world)).to_cols_array_2d();
            stats += device.draw(&DrawCall {
                shader: SHADOW_CASTER,
                state: DrawState::OPAQUE,
                uniforms: bytemuck::bytes_of(&uniforms),
                textures: &[],
                geometry: Geometry::Indexed {
                    vertices: mesh.vertices,
                    indices: mesh.indices,
                    index_count: mesh.index_count,
                },
                viewport: None,
            })?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    fn translation(x: f32, y: f32, z: f32) -> Affine3A {
        Affine3A::from_translation(Vec3::new(x, y, z))
    }

    #[test]
    fn test_anim_time_wraps() {
        let mut env = SceneEnvironment::default();
        env.advance_anim_time(3599.5);
        env.advance_anim_time(1.0);
        assert!((env.anim_time() - 0.5).abs() < 1e-3);
        env.advance_anim_time(-5.0);
        assert!((env.anim_time() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_world_transforms_follow_parents() {
        let mut scene = SceneGraph::new();
        let root = scene.add_node(translation(1.0, 0.0, 0.0), Parent::Root).unwrap();
        let child = scene
            .add_node(translation(0.0, 2.0, 0.0), Parent::Node(root))
            .unwrap();
        scene.update();
        let world = scene.node(child).unwrap().world();
        assert_eq!(Vec3::from(world.translation), Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_bone_attachments_use_current_pose() {
        let mut scene = SceneGraph::new();
        let mut device = crate::recording::RecordingDevice::new(8, 8);
        let mesh = scene.add_mesh(&mut device, &[MeshVertex::zeroed(); 3], &[0, 1, 2]).unwrap();
        let body_node = scene.add_node(translation(10.0, 0.0, 0.0), Parent::Root).unwrap();
        let mut body = Body::new(body_node, mesh);
        body.skeleton = Some(
            Skeleton::new(vec![
                Bone { parent: None, local: translation(0.0, 0.0, 1.0) },
                Bone { parent: Some(0), local: translation(0.0, 1.0, 0.0) },
            ])
            .unwrap(),
        );
        let body = scene.add_body(body).unwrap();
        let hand = scene
            .add_node(Affine3A::IDENTITY, Parent::Bone { body, bone: 1 })
            .unwrap();

        scene.update();
        let at = Vec3::from(scene.node(hand).unwrap().world().translation);
        assert_eq!(at, Vec3::new(10.0, 1.0, 1.0));

        // A pose change shows up in the same update that moves the bone.
        if let Some(s) = scene.body_mut(body).unwrap().skeleton.as_mut() {
            s.set_local(0, translation(0.0, 0.0, 3.0));
        }
        scene.update();
        let at = Vec3::from(scene.node(hand).unwrap().world().translation);
        assert_eq!(at, Vec3::new(10.0, 1.0, 3.0));
        assert!(scene.remove_body(body).is_err());
    }

    #[test]
    fn test_skeleton_rejects_forward_parents() {
        let bones = vec![Bone { parent: Some(1), local: Affine3A::IDENTITY }];
        assert!(Skeleton::new(bones).is_err());
    }

    #[test]
    fn test_remove_referenced_node_fails() {
        let mut scene = SceneGraph::new();
        let node = scene.add_node(Affine3A::IDENTITY, Parent::Root).unwrap();
        let light = scene.add_light(Light::omni(node, Vec3::ONE, 5.0)).unwrap();
        assert!(scene.remove_node(node).is_err());
        scene.remove_light(light);
        assert!(scene.remove_node(node).is_ok());
    }

    #[test]
    fn test_light_direction_from_node() {
        let mut scene = SceneGraph::new();
        let node = scene
            .add_node(
                Affine3A::from_rotation_translation(
                    Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
                    Vec3::new(0.0, 20.0, 0.0),
                ),
                Parent::Root,
            )
            .unwrap();
        scene.add_light(Light::spot(node, Vec3::ONE, 5.0, 20.0, 30.0)).unwrap();
        scene.update();
        let lights = scene.lights_in_frustum(&Camera::new(1.0));
        assert_eq!(lights.len(), 1);
        assert!((lights[0].direction - Vec3::NEG_X).length() < 1e-5);
        assert!(lights[0].inner_cos > lights[0].outer_cos);
    }

    #[test]
    fn test_lights_outside_frustum_skipped() {
        let mut scene = SceneGraph::new();
        let node = scene.add_node(translation(0.0, -50.0, 0.0), Parent::Root).unwrap();
        scene.add_light(Light::omni(node, Vec3::ONE, 5.0)).unwrap();
        let off = scene.add_node(translation(0.0, 10.0, 0.0), Parent::Root).unwrap();
        let mut disabled = Light::omni(off, Vec3::ONE, 5.0);
        disabled.enabled = false;
        scene.add_light(disabled).unwrap();
        scene.update();
        assert!(scene.lights_in_frustum(&Camera::new(1.0)).is_empty());
    }
}
