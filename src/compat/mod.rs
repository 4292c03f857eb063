//! The compatibility transformer: bridges capture-device GL semantics to
//! target-device semantics.
//!
//! Grounded on `gfx-backend-gl::info::{Version, get}` for device-descriptor
//! parsing and tri-state feature derivation (`features.rs`);
//! `gfx-backend-gl::state`'s GL-enum mapping-function style for the
//! texture-format conversion helper (`textures.rs`); and the VAO/client-array
//! split noted in `gfx-backend-gl/src/lib.rs`'s module doc comment for the
//! deferred client-array bookkeeping (`client_arrays.rs`).

pub mod client_arrays;
pub mod features;
pub mod textures;

use fxhash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::command::{Command, Extra, GlEnum, ObjectId};
use crate::externs::{ShaderTranslator, TextureDecompressor};
use crate::id::CommandId;
use crate::memory::{MemoryRange, PoolId};
use crate::pipeline::{Sink, Transformer};
use crate::remap::HighIdAllocator;
use crate::state::objects::ShaderStage;
use crate::state::Version;

use client_arrays::{scan_index_range, ClientVertexAttrib};
pub use features::{DeviceDescriptor, Features, Support};
use textures::texture_compat;

const ARRAY_BUFFER: GlEnum = 0x8892;
const ELEMENT_ARRAY_BUFFER: GlEnum = 0x8893;
const COPY_WRITE_BUFFER: GlEnum = 0x8F37;
const UNIFORM_BUFFER: GlEnum = 0x8A11;
const STATIC_DRAW: GlEnum = 0x88E4;
const TEXTURE_EXTERNAL_OES: GlEnum = 0x8D65;
const TEXTURE_2D: GlEnum = 0x0DE1;
const FRAMEBUFFER_SRGB: GlEnum = 0x8DB9;
const FRAMEBUFFER: GlEnum = 0x8D40;

/// Deferred/transient state the compatibility transformer keeps per
/// context: the substitute default VAO (once generated), the set of
/// object ids already known to exist (for the missing-`glGen*` rule), and
/// the in-flight client-array map.
#[derive(Default)]
struct ContextCompatState {
    source_features: Option<Features>,
    default_vertex_array_id: Option<ObjectId>,
    known_buffers: FxHashSet<ObjectId>,
    known_textures: FxHashSet<ObjectId>,
    client_vas: FxHashMap<u32, ClientVertexAttrib>,
    client_vas_enabled: FxHashSet<u32>,
    ubo_scratch: FxHashMap<u32, ObjectId>,
    warned_msaa: FxHashSet<(ObjectId, i32)>,
}

/// Bridges one capture device to one target device. `T` and `D` are the
/// external collaborators this stage delegates to; generic so the core
/// stays testable with the `#[cfg(test)]` doubles in
/// `crate::externs::doubles`.
pub struct CompatibilityTransformer<T: ShaderTranslator, D: TextureDecompressor> {
    target: DeviceDescriptor,
    target_version: Version,
    target_features: Features,
    translator: T,
    decompressor: D,
    per_context: FxHashMap<ObjectId, ContextCompatState>,
    high_ids: HighIdAllocator,
    /// Bump allocator minting fresh addresses in the `Temporary` memory pool
    /// for bytes this transformer synthesizes itself (decompressed texture
    /// data, EGL image readback, client-array uploads) — never capture
    /// memory, so it cannot collide with observed ranges.
    scratch_next: u64,
    warned_colorspace: bool,
}

impl<T: ShaderTranslator, D: TextureDecompressor> CompatibilityTransformer<T, D> {
    pub fn new(target: DeviceDescriptor, translator: T, decompressor: D) -> Self {
        let target_version =
            Version::parse(&target.version).unwrap_or_else(|_| Version::new(2, 0));
        let target_features = Features::derive(&target);
        CompatibilityTransformer {
            target,
            target_version,
            target_features,
            translator,
            decompressor,
            per_context: FxHashMap::default(),
            high_ids: HighIdAllocator::default(),
            scratch_next: 0,
            warned_colorspace: false,
        }
    }

    fn alloc_scratch(&mut self, len: u64) -> MemoryRange {
        let base = self.scratch_next;
        self.scratch_next += len.max(1);
        MemoryRange {
            pool: PoolId::Temporary,
            base,
            size: len,
        }
    }

    fn write_scratch(&mut self, out: &mut dyn Sink, bytes: &[u8]) -> MemoryRange {
        let range = self.alloc_scratch(bytes.len() as u64);
        // Infallible: we just minted `range` ourselves.
        let _ = out.state_mut().memory.write(range, bytes);
        range
    }

    fn ctx_state(&mut self, context: ObjectId) -> &mut ContextCompatState {
        self.per_context.entry(context).or_default()
    }

    fn forward(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
        out.mutate_and_write(id, cmd);
    }
}

impl<T: ShaderTranslator, D: TextureDecompressor> Transformer for CompatibilityTransformer<T, D> {
    fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
        let current_context = out.state().current_context_id().unwrap_or(0);

        match cmd {
            Command::EglMakeCurrent { context, extras } => {
                self.handle_make_current(id, context, extras, out);
            }

            Command::BindVertexArray { array, suffix_oes } => {
                let substitute = self
                    .per_context
                    .get(&current_context)
                    .and_then(|s| s.default_vertex_array_id);
                let array = if array == 0 {
                    substitute.unwrap_or(0)
                } else {
                    array
                };
                self.forward(id, Command::BindVertexArray { array, suffix_oes }, out);
            }

            Command::BindBuffer { target, buffer } => {
                self.ensure_generated_buffer(id, current_context, buffer, out);
                self.forward(id, Command::BindBuffer { target, buffer }, out);
            }
            Command::BindTexture { target, texture } => {
                self.ensure_generated_texture(id, current_context, texture, out);
                let target = self.rewrite_external_target(target);
                self.forward(id, Command::BindTexture { target, texture }, out);
            }

            Command::TexParameter {
                target,
                pname,
                value,
            } => {
                let target = self.rewrite_external_target(target);
                self.forward(id, Command::TexParameter { target, pname, value }, out);
            }

            Command::EglImageTargetTexture2DOES { target, image } => {
                self.handle_egl_image_target(id, current_context, target, image, out);
            }

            Command::BindBufferRange {
                target,
                index,
                buffer,
                offset,
                size,
            } if target == UNIFORM_BUFFER => {
                self.handle_uniform_buffer_range(id, current_context, index, buffer, offset, size, out);
            }

            Command::VertexAttribPointer {
                location,
                size,
                gl_type,
                normalized,
                stride,
                pointer,
            } => {
                self.handle_vertex_attrib_pointer(
                    id,
                    current_context,
                    location,
                    size,
                    gl_type,
                    normalized,
                    stride,
                    pointer.address,
                    out,
                );
            }

            Command::EnableVertexAttribArray(loc) => {
                self.ctx_state(current_context).client_vas_enabled.insert(loc);
                self.forward(id, Command::EnableVertexAttribArray(loc), out);
            }

            Command::DisableVertexAttribArray(loc) => {
                let vao = out.state().current_context().map(|c| c.bound.vertex_array).unwrap_or(0);
                let already_disabled = out
                    .state()
                    .current_context()
                    .and_then(|c| c.objects.private.vertex_arrays.get(&vao))
                    .and_then(|va| va.attributes.get(&loc))
                    .map(|a| !a.enabled)
                    .unwrap_or(true);
                self.ctx_state(current_context).client_vas_enabled.remove(&loc);
                self.ctx_state(current_context).client_vas.remove(&loc);
                if already_disabled {
                    // Redundant-call elimination.
                    return;
                }
                self.forward(id, Command::DisableVertexAttribArray(loc), out);
            }

            Command::VertexAttrib4fv { location, value } => {
                let vao = out.state().current_context().map(|c| c.bound.vertex_array).unwrap_or(0);
                let redundant = out
                    .state()
                    .current_context()
                    .and_then(|c| c.objects.private.vertex_arrays.get(&vao))
                    .and_then(|va| va.attributes.get(&location))
                    .and_then(|a| a.last_constant_value)
                    .map(|old| attrib_value_eq(&old, &value))
                    .unwrap_or(false);
                if redundant {
                    return;
                }
                self.forward(id, Command::VertexAttrib4fv { location, value }, out);
            }

            Command::DrawArrays { mode, first, count } => {
                let mut derived = id.derived_seq();
                self.resolve_client_arrays_for_draw(
                    &mut derived,
                    current_context,
                    first.max(0) as u32,
                    count.max(0) as u32,
                    out,
                );
                self.forward(id, Command::DrawArrays { mode, first, count }, out);
            }
            Command::DrawElements {
                mode,
                count,
                index_type,
                indices,
            } => {
                self.handle_draw_elements(id, current_context, mode, count, index_type, indices, out);
            }

            Command::CompressedTexImage2D {
                target,
                level,
                internal_format,
                width,
                height,
                data,
                image_size,
            } => {
                self.handle_compressed_tex_image(
                    id,
                    target,
                    level,
                    internal_format,
                    width,
                    height,
                    data,
                    image_size,
                    out,
                );
            }

            Command::TexImage2D {
                target,
                level,
                internal_format,
                width,
                height,
                format,
                gl_type,
                data,
            } => {
                let c = texture_compat(self.target.is_es, internal_format, format, gl_type);
                self.apply_swizzle(current_context, target, c.swizzle, out);
                self.forward(
                    id,
                    Command::TexImage2D {
                        target,
                        level,
                        internal_format: c.internal_format,
                        width,
                        height,
                        format: c.format,
                        gl_type: c.gl_type,
                        data,
                    },
                    out,
                );
            }

            Command::ShaderSource { shader, source } => {
                self.handle_shader_source(id, shader, source, out);
            }

            Command::LinkProgram { program, extras } => {
                self.forward(id, Command::LinkProgram { program, extras: extras.clone() }, out);
                self.seed_uniform_array_locations(id, program, &extras, out);
            }

            Command::ProgramBinary {
                program,
                binary_format,
                data,
                length,
                extras,
                suffix_oes,
            } => {
                self.handle_program_binary(
                    id,
                    current_context,
                    program,
                    binary_format,
                    data,
                    length,
                    extras,
                    suffix_oes,
                    out,
                );
            }

            Command::BindFramebuffer { target, framebuffer } => {
                self.handle_bind_framebuffer(id, current_context, target, framebuffer, out);
            }

            Command::Enable(pname) if pname == FRAMEBUFFER_SRGB => {
                self.handle_enable_srgb(id, current_context, out);
            }

            Command::MapBufferRange {
                target,
                offset,
                size,
                access,
                suffix_oes: _,
            } if !self.target.is_es => {
                self.forward(
                    id,
                    Command::MapBufferRange {
                        target,
                        offset,
                        size,
                        access,
                        suffix_oes: false,
                    },
                    out,
                );
            }
            Command::UnmapBuffer { target, suffix_oes: _ } if !self.target.is_es => {
                self.forward(id, Command::UnmapBuffer { target, suffix_oes: false }, out);
            }
            Command::FlushMappedBufferRange {
                target,
                offset,
                size,
                suffix_ext: _,
            } if !self.target.is_es => {
                self.forward(
                    id,
                    Command::FlushMappedBufferRange {
                        target,
                        offset,
                        size,
                        suffix_ext: false,
                    },
                    out,
                );
            }
            Command::TexStorage2D {
                target,
                levels,
                internal_format,
                width,
                height,
                suffix: _,
            } if !self.target.is_es => {
                self.forward(
                    id,
                    Command::TexStorage2D {
                        target,
                        levels,
                        internal_format,
                        width,
                        height,
                        suffix: crate::command::TexStorageSuffix::None,
                    },
                    out,
                );
            }
            Command::TexImage3D {
                target,
                level,
                internal_format,
                width,
                height,
                depth,
                format,
                gl_type,
                data,
                suffix_oes: _,
            } if !self.target.is_es => {
                self.forward(
                    id,
                    Command::TexImage3D {
                        target,
                        level,
                        internal_format,
                        width,
                        height,
                        depth,
                        format,
                        gl_type,
                        data,
                        suffix_oes: false,
                    },
                    out,
                );
            }
            Command::TexSubImage3D {
                target,
                level,
                suffix_oes: _,
            } if !self.target.is_es => {
                self.forward(
                    id,
                    Command::TexSubImage3D {
                        target,
                        level,
                        suffix_oes: false,
                    },
                    out,
                );
            }
            Command::StartTilingQCOM | Command::EndTilingQCOM if !self.target.is_es => {
                // No desktop equivalent; dropped.
            }

            Command::RenderbufferStorageMultisampleEXT {
                samples,
                internal_format,
                width,
                height,
            } if self.target_features.texture_multisample == Support::Unsupported => {
                self.warn_msaa_degrade(current_context, 0, samples);
                self.forward(
                    id,
                    Command::RenderbufferStorageMultisampleEXT {
                        samples: 0,
                        internal_format,
                        width,
                        height,
                    },
                    out,
                );
            }
            Command::FramebufferTexture2DMultisampleEXT {
                target,
                attachment,
                tex_target,
                texture,
                level,
                samples,
            } if self.target_features.texture_multisample == Support::Unsupported => {
                self.warn_msaa_degrade(current_context, texture as ObjectId, samples);
                self.forward(
                    id,
                    Command::FramebufferTexture2DMultisampleEXT {
                        target,
                        attachment,
                        tex_target,
                        texture,
                        level,
                        samples: 0,
                    },
                    out,
                );
            }

            // Silenced no-ops: debug markers/labels,
            // callback registration, resource-status queries, generic
            // `glGet*` have no effect on rendering and are fragile across
            // drivers.
            Command::DebugMarker { .. } | Command::GetError | Command::GenericGet { .. } => {}

            other => self.forward(id, other, out),
        }
    }

    fn flush(&mut self, _out: &mut dyn Sink) {
        // Nothing to flush: all deferred work happens at the draw-call site.
    }
}

/// Any `NaN` component makes the comparison always "not equal".
fn attrib_value_eq(a: &[f32; 4], b: &[f32; 4]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y && !x.is_nan() && !y.is_nan())
}

impl<T: ShaderTranslator, D: TextureDecompressor> CompatibilityTransformer<T, D> {
    fn handle_make_current(
        &mut self,
        id: CommandId,
        context: ObjectId,
        extras: Vec<Extra>,
        out: &mut dyn Sink,
    ) {
        let boot_version = extras.iter().find_map(|e| match e {
            Extra::StaticContextState { major, minor } => Some((*major, *minor)),
            _ => None,
        });

        let needs_boot_rewrite =
            !self.target.is_es && boot_version.map_or(false, |(major, _)| major < 3);

        // Source features must reflect the capture's own reported version,
        // not the boot-rewrite's forced one below — derive them from the
        // context's current constants plus this call's *original*
        // `StaticContextState`, before any rewrite is applied.
        if let Some(ctx) = out.state().contexts.get(&context) {
            let mut constants = ctx.constants.clone();
            if let Some((major, minor)) = boot_version {
                constants.version = crate::state::Version::new(major, minor);
            }
            self.ctx_state(context).source_features = Some(Features::derive_from_constants(&constants));
        }

        let emit_extras = if needs_boot_rewrite {
            let mut extras = extras.clone();
            extras.retain(|e| !matches!(e, Extra::StaticContextState { .. }));
            extras.push(Extra::StaticContextState { major: 3, minor: 0 });
            extras
        } else {
            extras
        };

        self.forward(id, Command::EglMakeCurrent { context, extras: emit_extras }, out);

        // Default VAO substitution: first `EglMakeCurrent` for this context
        // only.
        let needs_default_vao = self.target_features.vertex_array_objects == Support::Required
            && self
                .ctx_state(context)
                .source_features
                .as_ref()
                .map(|f| f.vertex_array_objects != Support::Required)
                .unwrap_or(true)
            && self.ctx_state(context).default_vertex_array_id.is_none();

        if needs_default_vao {
            let vao_id = self.high_ids.alloc();
            self.ctx_state(context).default_vertex_array_id = Some(vao_id);
            self.forward(id.derived(), Command::GenVertexArrays(vec![vao_id]), out);
            self.forward(
                id.derived().derived(),
                Command::BindVertexArray {
                    array: vao_id,
                    suffix_oes: false,
                },
                out,
            );
        }

        if !self.warned_colorspace {
            // `KHR_gl_colorspace` interaction with sRGB handling is not modeled;
            // flagged rather than guessed at.
            if out
                .state()
                .contexts
                .get(&context)
                .map(|c| c.constants.has_extension("EGL_KHR_gl_colorspace"))
                .unwrap_or(false)
            {
                log::warn!("EGL_KHR_gl_colorspace is present but not modeled by the sRGB rewrite rule");
                self.warned_colorspace = true;
            }
        }
    }

    fn ensure_generated_buffer(&mut self, id: CommandId, context: ObjectId, buffer: ObjectId, out: &mut dyn Sink) {
        if buffer == 0 {
            return;
        }
        let exists = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.objects.shared.buffers.contains_key(&buffer))
            .unwrap_or(false);
        let known = self.ctx_state(context).known_buffers.contains(&buffer);
        if exists || known {
            self.ctx_state(context).known_buffers.insert(buffer);
            return;
        }
        self.ctx_state(context).known_buffers.insert(buffer);
        self.forward(id.derived(), Command::GenBuffers(vec![buffer]), out);
    }

    fn ensure_generated_texture(&mut self, id: CommandId, context: ObjectId, texture: ObjectId, out: &mut dyn Sink) {
        if texture == 0 {
            return;
        }
        let exists = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.objects.shared.textures.contains_key(&texture))
            .unwrap_or(false);
        let known = self.ctx_state(context).known_textures.contains(&texture);
        if exists || known {
            self.ctx_state(context).known_textures.insert(texture);
            return;
        }
        self.ctx_state(context).known_textures.insert(texture);
        self.forward(id.derived(), Command::GenTextures(vec![texture]), out);
    }

    fn rewrite_external_target(&self, target: GlEnum) -> GlEnum {
        if target == TEXTURE_EXTERNAL_OES && self.target_features.egl_image_external == Support::Unsupported {
            TEXTURE_2D
        } else {
            target
        }
    }

    fn apply_swizzle(
        &mut self,
        context: ObjectId,
        target: GlEnum,
        swizzle: Option<[GlEnum; 4]>,
        out: &mut dyn Sink,
    ) {
        let swizzle = match swizzle {
            Some(s) => s,
            None => return,
        };
        let unit = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.active_texture_unit)
            .unwrap_or(0);
        let texture_id = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound_texture_for_unit(unit, target))
            .unwrap_or(0);
        if let Some(ctx) = out.state_mut().contexts.get_mut(&context) {
            if let Some(tex) = ctx.objects.shared.textures.get_mut(&texture_id) {
                tex.swizzle = Some(swizzle);
            }
        }
    }

    fn handle_egl_image_target(
        &mut self,
        id: CommandId,
        context: ObjectId,
        target: GlEnum,
        image: u64,
        out: &mut dyn Sink,
    ) {
        let target = self.rewrite_external_target(target);
        self.forward(id, Command::EglImageTargetTexture2DOES { target, image }, out);
        // Re-upload of content for an image bound this way happens lazily,
        // at the framebuffer bind that next reads it dirty.
        let _ = context;
    }

    fn handle_uniform_buffer_range(
        &mut self,
        id: CommandId,
        context: ObjectId,
        index: u32,
        buffer: ObjectId,
        offset: i64,
        size: i64,
        out: &mut dyn Sink,
    ) {
        let alignment = self.target.uniform_buffer_alignment.max(1);
        if offset % alignment == 0 {
            self.forward(
                id,
                Command::BindBufferRange {
                    target: UNIFORM_BUFFER,
                    index,
                    buffer,
                    offset,
                    size,
                },
                out,
            );
            return;
        }

        let prev_copy_write = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.copy_write_buffer)
            .unwrap_or(0);

        let mut derived = id.derived_seq();
        let scratch = *self.ctx_state(context).ubo_scratch.get(&index).unwrap_or(&0);
        let scratch = if scratch == 0 {
            let new_id = self.high_ids.alloc();
            self.ctx_state(context).ubo_scratch.insert(index, new_id);
            self.forward(derived.next(), Command::GenBuffers(vec![new_id]), out);
            new_id
        } else {
            scratch
        };

        self.forward(
            derived.next(),
            Command::BindBuffer {
                target: COPY_WRITE_BUFFER,
                buffer: scratch,
            },
            out,
        );
        self.forward(
            derived.next(),
            Command::BufferData {
                target: COPY_WRITE_BUFFER,
                size,
                data: None,
                usage: STATIC_DRAW,
            },
            out,
        );
        self.forward(
            derived.next(),
            Command::CopyBufferSubData {
                read_target: UNIFORM_BUFFER,
                write_target: COPY_WRITE_BUFFER,
                read_offset: offset,
                write_offset: 0,
                size,
            },
            out,
        );
        self.forward(
            derived.next(),
            Command::BindBufferRange {
                target: UNIFORM_BUFFER,
                index,
                buffer: scratch,
                offset: 0,
                size,
            },
            out,
        );
        self.forward(
            derived.next(),
            Command::BindBuffer {
                target: COPY_WRITE_BUFFER,
                buffer: prev_copy_write,
            },
            out,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_vertex_attrib_pointer(
        &mut self,
        id: CommandId,
        context: ObjectId,
        location: u32,
        size: i32,
        gl_type: GlEnum,
        normalized: bool,
        stride: i32,
        address: u64,
        out: &mut dyn Sink,
    ) {
        let array_buffer_bound = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.array_buffer != 0)
            .unwrap_or(true);
        let requires_vao = self.target_features.vertex_array_objects == Support::Required;

        if !array_buffer_bound && requires_vao {
            self.ctx_state(context).client_vas.insert(
                location,
                ClientVertexAttrib {
                    location,
                    size,
                    gl_type,
                    normalized,
                    stride,
                    base_address: address,
                },
            );
            return;
        }

        self.forward(
            id,
            Command::VertexAttribPointer {
                location,
                size,
                gl_type,
                normalized,
                stride,
                pointer: crate::command::CapturePointer { address },
            },
            out,
        );
    }

    fn resolve_client_arrays_for_draw(
        &mut self,
        derived: &mut crate::id::DerivedIds,
        context: ObjectId,
        first: u32,
        count: u32,
        out: &mut dyn Sink,
    ) {
        let pending: SmallVec<[(u32, ClientVertexAttrib); 16]> = self
            .ctx_state(context)
            .client_vas
            .iter()
            .map(|(&loc, &attr)| (loc, attr))
            .collect();
        if pending.is_empty() {
            return;
        }

        // Each attribute's byte range for this draw, sorted so overlapping
        // ranges across attributes end up adjacent.
        let mut covered: SmallVec<[(u32, ClientVertexAttrib, u64, u64); 16]> = pending
            .iter()
            .map(|&(loc, attr)| {
                let (start, len) = attr.covered_range(first, count);
                (loc, attr, start, len)
            })
            .collect();
        covered.sort_by_key(|&(_, _, start, _)| start);

        // Coalesce overlapping ranges into groups that share one buffer,
        // per §4.5 step 2 — `group_start`s are indices into `covered`.
        let mut groups: SmallVec<[(u64, u64, SmallVec<[usize; 4]>); 8]> = SmallVec::new();
        for (i, &(_, _, start, len)) in covered.iter().enumerate() {
            let end = start + len;
            if let Some((_, group_end, members)) = groups.last_mut() {
                if start < *group_end {
                    *group_end = (*group_end).max(end);
                    members.push(i);
                    continue;
                }
            }
            let mut members = SmallVec::new();
            members.push(i);
            groups.push((start, end, members));
        }

        for (group_start, group_end, members) in groups {
            let len = group_end - group_start;
            let range = MemoryRange {
                pool: PoolId::Application,
                base: group_start,
                size: len,
            };
            let bytes = out.state().memory.read(range).ok().map(|b| b.to_vec());
            let bytes = bytes.unwrap_or_else(|| vec![0u8; len as usize]);
            let scratch_range = self.write_scratch(out, &bytes);

            let buffer_id = self.high_ids.alloc();
            self.forward(derived.next(), Command::GenBuffers(vec![buffer_id]), out);
            self.forward(
                derived.next(),
                Command::BindBuffer {
                    target: ARRAY_BUFFER,
                    buffer: buffer_id,
                },
                out,
            );
            self.forward(
                derived.next(),
                Command::BufferData {
                    target: ARRAY_BUFFER,
                    size: len as i64,
                    data: Some(crate::command::CapturePointer {
                        address: scratch_range.base,
                    }),
                    usage: STATIC_DRAW,
                },
                out,
            );
            for idx in members {
                let (loc, attr, start, _) = covered[idx];
                self.forward(
                    derived.next(),
                    Command::VertexAttribPointer {
                        location: loc,
                        size: attr.size,
                        gl_type: attr.gl_type,
                        normalized: attr.normalized,
                        stride: attr.stride,
                        pointer: crate::command::CapturePointer {
                            address: start - group_start,
                        },
                    },
                    out,
                );
            }
        }
        self.ctx_state(context).client_vas.clear();
    }

    fn handle_draw_elements(
        &mut self,
        id: CommandId,
        context: ObjectId,
        mode: GlEnum,
        count: i32,
        index_type: GlEnum,
        indices: crate::command::CapturePointer,
        out: &mut dyn Sink,
    ) {
        let element_buffer_bound = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.element_array_buffer != 0)
            .unwrap_or(true);

        let mut derived = id.derived_seq();
        let (indices, index_range) = if element_buffer_bound {
            // `indices.address` is a byte offset into the bound
            // `ELEMENT_ARRAY_BUFFER`, not a client-memory address: look the
            // bytes up in that buffer's tracked data, not the application
            // memory pool.
            let byte_len = (count.max(0) as u64) * index_byte_size(index_type);
            let bytes = out.state().contexts.get(&context).and_then(|ctx| {
                let buffer_id = ctx.bound.element_array_buffer;
                let buf = ctx.objects.shared.buffers.get(&buffer_id)?;
                let start = indices.address as usize;
                let end = start.checked_add(byte_len as usize)?;
                buf.data.get(start..end).map(|b| b.to_vec())
            });
            let idx_range = bytes
                .as_deref()
                .and_then(|b| scan_index_range(b, index_type, count));
            (indices, idx_range)
        } else {
            // Indices themselves are client-side: move them into a scratch
            // element buffer first.
            let byte_len = (count.max(0) as u64) * index_byte_size(index_type);
            let range = MemoryRange {
                pool: PoolId::Application,
                base: indices.address,
                size: byte_len,
            };
            let bytes = out
                .state()
                .memory
                .read(range)
                .ok()
                .map(|b| b.to_vec())
                .unwrap_or_else(|| vec![0u8; byte_len as usize]);
            let idx_range = scan_index_range(&bytes, index_type, count);
            let scratch = self.write_scratch(out, &bytes);
            let buffer_id = self.high_ids.alloc();
            self.forward(derived.next(), Command::GenBuffers(vec![buffer_id]), out);
            self.forward(
                derived.next(),
                Command::BindBuffer {
                    target: ELEMENT_ARRAY_BUFFER,
                    buffer: buffer_id,
                },
                out,
            );
            self.forward(
                derived.next(),
                Command::BufferData {
                    target: ELEMENT_ARRAY_BUFFER,
                    size: byte_len as i64,
                    data: Some(crate::command::CapturePointer { address: scratch.base }),
                    usage: STATIC_DRAW,
                },
                out,
            );
            (
                crate::command::CapturePointer { address: 0 },
                idx_range,
            )
        };

        let (first, vcount) = index_range.map(|(min, max)| (min, max - min + 1)).unwrap_or((0, 0));
        self.resolve_client_arrays_for_draw(&mut derived, context, first, vcount, out);

        self.forward(
            id,
            Command::DrawElements {
                mode,
                count,
                index_type,
                indices,
            },
            out,
        );

        if !self.ctx_state(context).client_vas.is_empty() {
            log::warn!("unresolved client vertex arrays remain bound at draw call {:?}", id);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_compressed_tex_image(
        &mut self,
        id: CommandId,
        target: GlEnum,
        level: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
        data: crate::command::CapturePointer,
        image_size: i32,
        out: &mut dyn Sink,
    ) {
        if self.target_features.compressed_texture_formats.contains(&internal_format) {
            self.forward(
                id,
                Command::CompressedTexImage2D {
                    target,
                    level,
                    internal_format,
                    width,
                    height,
                    data,
                    image_size,
                },
                out,
            );
            return;
        }

        let range = MemoryRange {
            pool: PoolId::Application,
            base: data.address,
            size: image_size.max(0) as u64,
        };
        let compressed = match out.state().memory.read(range) {
            Ok(bytes) => bytes.to_vec(),
            Err(_) => {
                log::warn!("compressed texture data unavailable at command {:?}; passing through", id);
                self.forward(
                    id,
                    Command::CompressedTexImage2D {
                        target,
                        level,
                        internal_format,
                        width,
                        height,
                        data,
                        image_size,
                    },
                    out,
                );
                return;
            }
        };

        match self
            .decompressor
            .decompress(internal_format, width.max(0) as u32, height.max(0) as u32, &compressed)
        {
            Ok((rgba, (format, gl_type))) => {
                let scratch = self.write_scratch(out, &rgba);
                self.forward(
                    id,
                    Command::TexImage2D {
                        target,
                        level,
                        internal_format: format,
                        width,
                        height,
                        format,
                        gl_type,
                        data: Some(crate::command::CapturePointer { address: scratch.base }),
                    },
                    out,
                );
            }
            Err(err) => {
                log::warn!("texture decompression failed, passing through unmodified: {}", err);
                self.forward(
                    id,
                    Command::CompressedTexImage2D {
                        target,
                        level,
                        internal_format,
                        width,
                        height,
                        data,
                        image_size,
                    },
                    out,
                );
            }
        }
    }

    fn handle_shader_source(&mut self, id: CommandId, shader: ObjectId, source: String, out: &mut dyn Sink) {
        let stage = detect_stage(&source);
        match self.translator.translate(&source, stage, &self.target.extensions, &self.target_version) {
            Ok(translated) => {
                self.forward(
                    id,
                    Command::ShaderSource {
                        shader,
                        source: translated,
                    },
                    out,
                );
            }
            Err(err) => {
                // Dropped and logged; replay continues, likely failing later
                // at compile/link.
                log::warn!("shader translation failed for shader {}: {}", shader, err);
            }
        }
    }

    fn seed_uniform_array_locations(
        &mut self,
        id: CommandId,
        program: ObjectId,
        extras: &[Extra],
        out: &mut dyn Sink,
    ) {
        let uniforms = extras.iter().find_map(|e| match e {
            Extra::ProgramInfo { active_uniforms, .. } => Some(active_uniforms.clone()),
            _ => None,
        });
        let uniforms = match uniforms {
            Some(u) => u,
            None => return,
        };
        let mut derived = id.derived_seq();
        for uniform in uniforms.iter().filter(|u| u.array_size > 1) {
            for i in 0..uniform.array_size {
                let name = format!("{}[{}]", uniform.name, i);
                self.forward(
                    derived.next(),
                    Command::GetUniformLocation {
                        program,
                        name,
                    },
                    out,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_program_binary(
        &mut self,
        id: CommandId,
        context: ObjectId,
        program: ObjectId,
        binary_format: GlEnum,
        data: crate::command::CapturePointer,
        length: i32,
        extras: Vec<Extra>,
        suffix_oes: bool,
        out: &mut dyn Sink,
    ) {
        let capture_vendor_version = out.state().contexts.get(&context).map(|c| {
            (c.constants.vendor.clone(), c.constants.version.clone())
        });
        let target_vendor_version = (self.target.vendor.clone(), self.target_version.clone());
        let mismatched = capture_vendor_version
            .map(|cv| cv != target_vendor_version)
            .unwrap_or(true);

        if !mismatched {
            self.forward(
                id,
                Command::ProgramBinary {
                    program,
                    binary_format,
                    data,
                    length,
                    extras,
                    suffix_oes,
                },
                out,
            );
            return;
        }

        // Stubbed equivalent built from recorded metadata; the original
        // binary bytes are vendor/version specific and cannot be replayed
        // portably.
        self.forward(id, Command::LinkProgram { program, extras }, out);
    }

    fn handle_bind_framebuffer(
        &mut self,
        id: CommandId,
        context: ObjectId,
        target: GlEnum,
        framebuffer: ObjectId,
        out: &mut dyn Sink,
    ) {
        let prior_draw_fbo = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.draw_framebuffer)
            .unwrap_or(0);

        self.resolve_egl_image_dirty(id, context, prior_draw_fbo, out);

        self.forward(id, Command::BindFramebuffer { target, framebuffer }, out);

        let needs_srgb_rewrite = self.needs_srgb_rewrite(context);
        if needs_srgb_rewrite {
            let prev_srgb = out
                .state()
                .current_context()
                .map(|c| c.fragment_operations.framebuffer_srgb)
                .unwrap_or(false);
            let rewrite = if framebuffer == 0 {
                Command::Disable(FRAMEBUFFER_SRGB)
            } else {
                Command::Enable(FRAMEBUFFER_SRGB)
            };
            self.forward(id.derived(), rewrite, out);
            // Keep the simulated flag as the app's own intent, not what
            // this rewrite injected.
            if let Some(ctx) = out.state_mut().current_context_mut() {
                ctx.fragment_operations.framebuffer_srgb = prev_srgb;
            }
        }
    }

    fn needs_srgb_rewrite(&self, context: ObjectId) -> bool {
        let source_requires = self
            .per_context
            .get(&context)
            .and_then(|s| s.source_features.as_ref())
            .map(|f| f.framebuffer_srgb == Support::Required)
            .unwrap_or(false);
        !source_requires && self.target_features.framebuffer_srgb == Support::Required
    }

    fn handle_enable_srgb(&mut self, id: CommandId, context: ObjectId, out: &mut dyn Sink) {
        let draw_fbo = out
            .state()
            .contexts
            .get(&context)
            .map(|c| c.bound.draw_framebuffer)
            .unwrap_or(0);
        if self.needs_srgb_rewrite(context) && draw_fbo == 0 {
            // Standalone `glEnable(FRAMEBUFFER_SRGB)` against the default
            // framebuffer is suppressed in this mode.
            return;
        }
        self.forward(id, Command::Enable(FRAMEBUFFER_SRGB), out);
    }

    fn resolve_egl_image_dirty(
        &mut self,
        id: CommandId,
        context: ObjectId,
        framebuffer: ObjectId,
        out: &mut dyn Sink,
    ) {
        let dirty_image = out.state().contexts.get(&context).and_then(|c| {
            let fb = c.objects.private.framebuffers.get(&framebuffer)?;
            if !fb.egl_image_dirty {
                return None;
            }
            let attachment = fb.color_attachments.iter().flatten().next()?;
            match attachment.source {
                crate::state::objects::AttachmentSource::Texture { texture, .. } => {
                    c.objects.shared.textures.get(&texture).and_then(|t| t.egl_image)
                }
                _ => None,
            }
        });
        if let Some(handle) = dirty_image {
            self.forward(
                id.derived(),
                Command::ReadPixels {
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                    format: 0x1908,
                    gl_type: 0x1401,
                },
                out,
            );
            let range = MemoryRange {
                pool: PoolId::Allocation(u32::MAX),
                base: handle,
                size: 0,
            };
            let _ = out.state_mut().memory.write(range, &[]);
            if let Some(ctx) = out.state_mut().contexts.get_mut(&context) {
                if let Some(fb) = ctx.objects.private.framebuffers.get_mut(&framebuffer) {
                    fb.egl_image_dirty = false;
                }
            }
        }
    }

    fn warn_msaa_degrade(&mut self, context: ObjectId, key: ObjectId, samples: i32) {
        let state = self.ctx_state(context);
        if state.warned_msaa.insert((key, samples)) {
            // Multisample render-to-texture degrades silently in the source
            // design; we log instead.
            // TODO: implement an actual single-sample resolve path once a
            // backend builder that supports it is available.
            log::warn!(
                "degrading {}x multisample render-to-texture to single-sample (context {})",
                samples,
                context
            );
        }
    }
}

fn index_byte_size(index_type: GlEnum) -> u64 {
    match index_type {
        client_arrays::UNSIGNED_BYTE => 1,
        client_arrays::UNSIGNED_SHORT => 2,
        client_arrays::UNSIGNED_INT => 4,
        _ => 2,
    }
}

/// `glShaderSource` carries no explicit stage in this model (`glCreateShader`
/// with its `type` argument is out of the modeled taxonomy); heuristically
/// detect it from the source text, matching the builtins each stage alone
/// can reference.
fn detect_stage(source: &str) -> ShaderStage {
    if source.contains("gl_Position") {
        ShaderStage::Vertex
    } else {
        ShaderStage::Fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Atom, Command, Extra, UniformInfo};
    use crate::externs::doubles::{EchoShaderTranslator, FailingDecompressor};
    use crate::id::CommandId;
    use crate::pipeline::{CollectingSink, Pipeline};
    use crate::state::{Constants, State, Version as StateVersion};

    fn target(is_es: bool, version: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            is_es,
            version: version.to_string(),
            vendor: "Test".into(),
            extensions: vec![],
            uniform_buffer_alignment: 256,
        }
    }

    fn make_transformer(
        desc: DeviceDescriptor,
    ) -> CompatibilityTransformer<EchoShaderTranslator, FailingDecompressor> {
        CompatibilityTransformer::new(desc, EchoShaderTranslator, FailingDecompressor)
    }

    fn boot(context: ObjectId, major: u32, minor: u32) -> Vec<(CommandId, Command)> {
        vec![
            (
                CommandId::original(0),
                Command::EglCreateContext {
                    context,
                    share_context: 0,
                },
            ),
            (
                CommandId::original(1),
                Command::EglMakeCurrent {
                    context,
                    extras: vec![Extra::StaticContextState { major, minor }],
                },
            ),
        ]
    }

    #[test]
    fn default_vao_substitution_on_gles2_source_to_desktop_target() {
        let transformer = make_transformer(target(false, "3.0"));
        let mut pipeline = Pipeline::new().push(Box::new(transformer));
        let mut sink = CollectingSink::new(State::new());

        let mut cmds = boot(1, 2, 0);
        cmds.push((
            CommandId::original(2),
            Command::BindVertexArray {
                array: 0,
                suffix_oes: false,
            },
        ));
        pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);

        // GenVertexArrays + BindVertexArray(substitute) get injected right
        // after EglMakeCurrent, and the capture's own BindVertexArray(0) is
        // rewritten to bind the same substitute.
        let gen = sink
            .emitted
            .iter()
            .find(|(_, c)| matches!(c, Command::GenVertexArrays(_)));
        assert!(gen.is_some());
        let last_bind = sink
            .emitted
            .iter()
            .filter_map(|(_, c)| match c {
                Command::BindVertexArray { array, .. } => Some(*array),
                _ => None,
            })
            .last()
            .unwrap();
        assert_ne!(last_bind, 0);
    }

    #[test]
    fn missing_gen_is_synthesized_before_bind_buffer() {
        let transformer = make_transformer(target(false, "3.0"));
        let mut pipeline = Pipeline::new().push(Box::new(transformer));
        let mut sink = CollectingSink::new(State::new());

        let mut cmds = boot(1, 2, 0);
        cmds.push((
            CommandId::original(2),
            Command::BindBuffer {
                target: ARRAY_BUFFER,
                buffer: 7,
            },
        ));
        pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);

        let gen_index = sink
            .emitted
            .iter()
            .position(|(_, c)| matches!(c, Command::GenBuffers(ids) if ids == &vec![7]));
        let bind_index = sink
            .emitted
            .iter()
            .position(|(_, c)| matches!(c, Command::BindBuffer { buffer: 7, .. }));
        assert!(gen_index.is_some() && bind_index.is_some());
        assert!(gen_index.unwrap() < bind_index.unwrap());
    }

    #[test]
    fn shader_source_is_translated_through_collaborator() {
        let transformer = make_transformer(target(false, "3.0"));
        let mut pipeline = Pipeline::new().push(Box::new(transformer));
        let mut sink = CollectingSink::new(State::new());

        let cmds = vec![(
            CommandId::original(0),
            Command::ShaderSource {
                shader: 1,
                source: "void main(){}".into(),
            },
        )];
        pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);
        assert_eq!(sink.emitted.len(), 1);
    }

    #[test]
    fn debug_markers_are_dropped() {
        let transformer = make_transformer(target(false, "3.0"));
        let mut pipeline = Pipeline::new().push(Box::new(transformer));
        let mut sink = CollectingSink::new(State::new());

        let cmds = vec![(
            CommandId::original(0),
            Command::DebugMarker { text: "frame start".into() },
        )];
        pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn redundant_vertex_attrib4fv_is_dropped_but_nan_never_elides() {
        assert!(attrib_value_eq(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 4.0]));
        assert!(!attrib_value_eq(&[f32::NAN, 0.0, 0.0, 0.0], &[f32::NAN, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn egl_image_external_target_rewritten_on_desktop() {
        let transformer = make_transformer(target(false, "3.0"));
        assert_eq!(transformer.rewrite_external_target(TEXTURE_EXTERNAL_OES), TEXTURE_2D);
    }

    #[test]
    fn uniform_array_seeds_per_element_locations() {
        let transformer = make_transformer(target(false, "3.0"));
        let mut pipeline = Pipeline::new().push(Box::new(transformer));
        let mut sink = CollectingSink::new(State::new());

        let mut cmds = boot(1, 2, 0);
        cmds.push((
            CommandId::original(2),
            Command::LinkProgram {
                program: 1,
                extras: vec![Extra::ProgramInfo {
                    active_uniforms: vec![UniformInfo {
                        name: "u".into(),
                        location: 0,
                        array_size: 2,
                        gl_type: 0x8B50,
                    }],
                    active_attributes: vec![],
                }],
            },
        ));
        pipeline.run(cmds.into_iter().map(Atom::from).collect(), &mut sink);

        let queries = sink
            .emitted
            .iter()
            .filter(|(_, c)| matches!(c, Command::GetUniformLocation { .. }))
            .count();
        assert_eq!(queries, 2);
    }
}
