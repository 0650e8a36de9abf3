//! Render-queue invocation tables.
//!
//! A pipeline pass runs an ordered table of invocations against one open
//! device pass. The order is fixed by the tables below; visual subsystems
//! outside this crate (sky, decals, particles, ...) plug in through
//! [`SceneSubsystems`].

use log::error;

use crate::camera::{Camera, CameraOpts};
use crate::deferred::{DeferredLightingPasses, LightingInputs};
use crate::device::{ColourMask, DrawCall, DrawStats, RenderDevice, TargetId};
use crate::error::Result;
use crate::options::GfxOptions;
use crate::scene::{SceneEnvironment, SceneGraph};

/// Everything a stage may draw with while a pass is open.
pub struct StageFrame<'a> {
    pub device: &'a mut dyn RenderDevice,
    pub camera: &'a Camera,
    pub opts: &'a CameraOpts,
    pub env: &'a SceneEnvironment,
    pub options: &'a GfxOptions,
    pub gbuffer: [TargetId; 3],
    /// Size of the pass attachments.
    pub width: u32,
    pub height: u32,
    /// Channels this pass may write.
    pub colour_mask: ColourMask,
    /// Work issued through [`StageFrame::draw`] so far.
    pub stats: DrawStats,
}

impl StageFrame<'_> {
    pub fn draw(&mut self, call: &DrawCall<'_>) -> Result<DrawStats> {
        let drawn = self.device.draw(call)?;
        self.stats += drawn;
        Ok(drawn)
    }
}

/// Scene content drawn by collaborators rather than by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneStage {
    GBufferOpaque,
    ForwardOpaque,
    Sky,
    Decals,
    Alpha,
    Particles,
    Tracers,
    Debug,
    FirstPerson,
    /// Overlay drawn straight onto the viewport after every eye.
    Hud,
}

/// Hooks for the visual subsystems layered on the deferred core.
pub trait SceneSubsystems {
    /// Called once per deferred pass before any forward geometry.
    fn reset_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn render_stage(&mut self, _stage: SceneStage, _frame: &mut StageFrame<'_>) -> Result<()> {
        Ok(())
    }
}

/// No subsystems: only scene bodies and lighting are drawn.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSubsystems;

impl SceneSubsystems for NullSubsystems {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderQueueInvocation {
    GBufferOpaque,
    ResetBuffers,
    DeferredLighting,
    ForwardOpaque,
    Sky,
    Decals,
    Alpha,
    Particles,
    Tracers,
    Debug,
    FirstPerson,
}

impl RenderQueueInvocation {
    pub fn name(self) -> &'static str {
        match self {
            RenderQueueInvocation::GBufferOpaque => "gbuffer opaque",
            RenderQueueInvocation::ResetBuffers => "reset buffers",
            RenderQueueInvocation::DeferredLighting => "deferred lighting",
            RenderQueueInvocation::ForwardOpaque => "forward opaque",
            RenderQueueInvocation::Sky => "sky",
            RenderQueueInvocation::Decals => "decals",
            RenderQueueInvocation::Alpha => "alpha",
            RenderQueueInvocation::Particles => "particles",
            RenderQueueInvocation::Tracers => "tracers",
            RenderQueueInvocation::Debug => "debug",
            RenderQueueInvocation::FirstPerson => "first person",
        }
    }

    /// Failures of isolated invocations are logged and the frame carries on.
    pub fn is_isolated(self) -> bool {
        !matches!(
            self,
            RenderQueueInvocation::GBufferOpaque
                | RenderQueueInvocation::ForwardOpaque
                | RenderQueueInvocation::Alpha
        )
    }

    pub fn enabled(self, opts: &CameraOpts) -> bool {
        match self {
            RenderQueueInvocation::Sky => opts.sky,
            RenderQueueInvocation::Decals => opts.decals,
            RenderQueueInvocation::Particles => opts.particles,
            RenderQueueInvocation::Tracers => opts.particles && opts.tracers,
            RenderQueueInvocation::FirstPerson => opts.first_person,
            _ => true,
        }
    }

    fn stage(self) -> Option<SceneStage> {
        Some(match self {
            RenderQueueInvocation::GBufferOpaque => SceneStage::GBufferOpaque,
            RenderQueueInvocation::ForwardOpaque => SceneStage::ForwardOpaque,
            RenderQueueInvocation::Sky => SceneStage::Sky,
            RenderQueueInvocation::Decals => SceneStage::Decals,
            RenderQueueInvocation::Alpha => SceneStage::Alpha,
            RenderQueueInvocation::Particles => SceneStage::Particles,
            RenderQueueInvocation::Tracers => SceneStage::Tracers,
            RenderQueueInvocation::Debug => SceneStage::Debug,
            RenderQueueInvocation::FirstPerson => SceneStage::FirstPerson,
            RenderQueueInvocation::ResetBuffers | RenderQueueInvocation::DeferredLighting => {
                return None
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvocationTable {
    pub name: &'static str,
    pub invocations: &'static [RenderQueueInvocation],
}

impl InvocationTable {
    pub const GBUFFER: InvocationTable = InvocationTable {
        name: "rqisGbuffer",
        invocations: &[RenderQueueInvocation::GBufferOpaque],
    };

    pub const DEFERRED: InvocationTable = InvocationTable {
        name: "rqisDeferred",
        invocations: &[
            RenderQueueInvocation::ResetBuffers,
            RenderQueueInvocation::DeferredLighting,
            RenderQueueInvocation::ForwardOpaque,
            RenderQueueInvocation::Sky,
            RenderQueueInvocation::Decals,
            RenderQueueInvocation::Alpha,
            RenderQueueInvocation::Particles,
            RenderQueueInvocation::Tracers,
            RenderQueueInvocation::Debug,
            RenderQueueInvocation::FirstPerson,
        ],
    };

    pub const DEBUG: InvocationTable = InvocationTable {
        name: "rqisDebug",
        invocations: &[
            RenderQueueInvocation::DeferredLighting,
            RenderQueueInvocation::Debug,
        ],
    };
}

/// Dispatches invocations to the scene, the lighting passes and the
/// subsystems.
pub struct Invoker<'a> {
    pub scene: &'a SceneGraph,
    pub subsystems: &'a mut dyn SceneSubsystems,
    pub lighting: &'a mut DeferredLightingPasses,
    pub lighting_inputs: &'a LightingInputs,
}

impl Invoker<'_> {
    /// Run every enabled invocation of `table` in order.
    pub fn run(&mut self, table: &InvocationTable, frame: &mut StageFrame<'_>) -> Result<()> {
        for &invocation in table.invocations {
            if !invocation.enabled(frame.opts) {
                continue;
            }
            match self.invoke(invocation, frame) {
                Ok(()) => {}
                Err(e) if invocation.is_isolated() => {
                    error!("{}: {} failed: {e}", table.name, invocation.name());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn invoke(
        &mut self,
        invocation: RenderQueueInvocation,
        frame: &mut StageFrame<'_>,
    ) -> Result<()> {
        match invocation {
            RenderQueueInvocation::ResetBuffers => self.subsystems.reset_buffers(),
            RenderQueueInvocation::DeferredLighting => {
                self.lighting.render(frame, self.scene, self.lighting_inputs)
            }
            RenderQueueInvocation::GBufferOpaque => {
                self.scene.draw_gbuffer(frame)?;
                self.subsystems
                    .render_stage(SceneStage::GBufferOpaque, frame)
            }
            other => match other.stage() {
                Some(stage) => self.subsystems.render_stage(stage, frame),
                None => Ok(()),
            },
        }
    }
}
