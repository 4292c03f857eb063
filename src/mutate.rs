//! `Command::Mutate` — advances the simulated state and, if a builder is
//! supplied, emits backend bytecode through it.
//!
//! Called with `builder = None`, this is the "mutate only" mode
//! transformers use to track state while not emitting — e.g. the
//! compatibility transformer mutating its view of the world for a command
//! it is about to rewrite.

use crate::command::{Command, Extra, GlEnum, ObjectId};
use crate::error::{Error, Result};
use crate::externs::ReplayBuilder;
use crate::state::objects::{
    AttachmentSource, AttribSource, Buffer, Framebuffer, Program, Shader, ShaderStage, Texture,
    TextureLevel, VertexAttributeArray,
};
use crate::state::{Bound, Constants, Context, State, UniformBufferBinding, Version};

const ARRAY_BUFFER: GlEnum = 0x8892;
const ELEMENT_ARRAY_BUFFER: GlEnum = 0x8893;
const COPY_WRITE_BUFFER: GlEnum = 0x8F37;
const UNIFORM_BUFFER: GlEnum = 0x8A11;

fn bound_buffer_slot<'a>(bound: &'a mut Bound, target: GlEnum) -> Option<&'a mut ObjectId> {
    match target {
        ARRAY_BUFFER => Some(&mut bound.array_buffer),
        ELEMENT_ARRAY_BUFFER => Some(&mut bound.element_array_buffer),
        COPY_WRITE_BUFFER => Some(&mut bound.copy_write_buffer),
        UNIFORM_BUFFER => Some(&mut bound.uniform_buffer),
        _ => None,
    }
}

/// Mutate `state` by interpreting `cmd`, optionally also emitting through
/// `builder`. Returns `Ok(())` on success; on invariant violation returns
/// `Error::Internal`.
pub fn mutate(
    cmd: &Command,
    state: &mut State,
    mut builder: Option<&mut dyn ReplayBuilder>,
) -> Result<()> {
    if let Some(b) = builder.as_deref_mut() {
        b.push(cmd);
    }

    match cmd {
        Command::EglCreateContext {
            context,
            share_context: _,
        } => {
            state.contexts.insert(
                *context,
                Context::new(Constants {
                    is_es: true,
                    version: Version::new(2, 0),
                    vendor: String::new(),
                    extensions: Vec::new(),
                }),
            );
        }
        Command::EglMakeCurrent { context, extras } => {
            if *context != 0 && !state.contexts.contains_key(context) {
                return Err(Error::Internal(format!(
                    "EglMakeCurrent on unknown context {}",
                    context
                )));
            }
            state.threads.insert(state.current_thread, *context);
            if let Some(ctx) = state.contexts.get_mut(context) {
                for extra in extras {
                    apply_context_extra(ctx, extra);
                }
            }
        }
        Command::EglDestroyContext { context } => {
            state.contexts.remove(context);
        }
        Command::SwapBuffers => {}

        Command::GenBuffers(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects.shared.buffers.insert(*id, Buffer::default());
            }
        }
        Command::GenTextures(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects.shared.textures.insert(*id, Texture::default());
            }
        }
        Command::GenVertexArrays(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects
                    .private
                    .vertex_arrays
                    .insert(*id, Default::default());
            }
        }
        Command::GenFramebuffers(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects
                    .private
                    .framebuffers
                    .insert(*id, Framebuffer::default());
            }
        }
        Command::DeleteBuffers(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects.shared.buffers.remove(id);
            }
        }
        Command::DeleteTextures(ids) => {
            let ctx = current_ctx_mut(state)?;
            for id in ids {
                ctx.objects.shared.textures.remove(id);
            }
        }

        Command::BindBuffer { target, buffer } => {
            let ctx = current_ctx_mut(state)?;
            if let Some(slot) = bound_buffer_slot(&mut ctx.bound, *target) {
                *slot = *buffer;
            }
            if let Some(buf) = ctx.objects.shared.buffers.get_mut(buffer) {
                buf.last_target = Some(*target);
            }
        }
        Command::BindBufferRange {
            target,
            index,
            buffer,
            offset,
            size,
        } => {
            let ctx = current_ctx_mut(state)?;
            if let Some(slot) = bound_buffer_slot(&mut ctx.bound, *target) {
                *slot = *buffer;
            }
            if *target == UNIFORM_BUFFER {
                ctx.bound.uniform_buffer_bindings.insert(
                    *index,
                    UniformBufferBinding {
                        buffer: *buffer,
                        offset: *offset,
                        size: *size,
                    },
                );
            }
        }
        Command::BufferData { target, size, .. } => {
            let ctx = current_ctx_mut(state)?;
            let buffer_id = *bound_buffer_slot(&mut ctx.bound, *target).unwrap_or(&mut 0);
            if let Some(buf) = ctx.objects.shared.buffers.get_mut(&buffer_id) {
                buf.size = *size;
                buf.data = vec![0u8; (*size).max(0) as usize];
            }
        }
        Command::CopyBufferSubData { .. } => {}
        Command::MapBufferRange { target, .. } => {
            let ctx = current_ctx_mut(state)?;
            let buffer_id = *bound_buffer_slot(&mut ctx.bound, *target).unwrap_or(&mut 0);
            if let Some(buf) = ctx.objects.shared.buffers.get_mut(&buffer_id) {
                buf.mapped = true;
            }
        }
        Command::UnmapBuffer { target, .. } => {
            let ctx = current_ctx_mut(state)?;
            let buffer_id = *bound_buffer_slot(&mut ctx.bound, *target).unwrap_or(&mut 0);
            if let Some(buf) = ctx.objects.shared.buffers.get_mut(&buffer_id) {
                buf.mapped = false;
            }
        }
        Command::FlushMappedBufferRange { .. } => {}

        Command::BindVertexArray { array, .. } => {
            let ctx = current_ctx_mut(state)?;
            ctx.bound.vertex_array = *array;
        }
        Command::EnableVertexAttribArray(loc) => {
            let ctx = current_ctx_mut(state)?;
            let vao = ctx.bound.vertex_array;
            let va = ctx
                .objects
                .private
                .vertex_arrays
                .entry(vao)
                .or_insert_with(Default::default);
            va.attributes.entry(*loc).or_default().enabled = true;
        }
        Command::DisableVertexAttribArray(loc) => {
            let ctx = current_ctx_mut(state)?;
            let vao = ctx.bound.vertex_array;
            let va = ctx
                .objects
                .private
                .vertex_arrays
                .entry(vao)
                .or_insert_with(Default::default);
            va.attributes.entry(*loc).or_default().enabled = false;
        }
        Command::VertexAttribPointer {
            location,
            size,
            gl_type,
            normalized,
            stride,
            pointer,
        } => {
            let ctx = current_ctx_mut(state)?;
            let array_buffer = ctx.bound.array_buffer;
            let vao = ctx.bound.vertex_array;
            let va = ctx
                .objects
                .private
                .vertex_arrays
                .entry(vao)
                .or_insert_with(Default::default);
            let attrib = va.attributes.entry(*location).or_default();
            attrib.size = *size;
            attrib.gl_type = *gl_type;
            attrib.normalized = *normalized;
            attrib.stride = *stride;
            attrib.source = Some(if array_buffer != 0 {
                AttribSource::Buffer {
                    buffer: array_buffer,
                    offset: pointer.address as i64,
                }
            } else {
                AttribSource::Client {
                    observed: crate::memory::MemoryRange {
                        pool: crate::memory::PoolId::Application,
                        base: pointer.address,
                        size: 0,
                    },
                }
            });
        }
        Command::VertexAttrib4fv { location, value } => {
            let ctx = current_ctx_mut(state)?;
            let vao = ctx.bound.vertex_array;
            let va = ctx
                .objects
                .private
                .vertex_arrays
                .entry(vao)
                .or_insert_with(Default::default);
            va.attributes.entry(*location).or_default().last_constant_value = Some(*value);
        }

        Command::BindTexture { target, texture } => {
            let ctx = current_ctx_mut(state)?;
            let unit = ctx.bound.active_texture_unit;
            ctx.bound.texture_units.insert((unit, *target), *texture);
            if let Some(tex) = ctx.objects.shared.textures.get_mut(texture) {
                if tex.target.is_none() {
                    tex.target = Some(*target);
                }
            }
        }
        Command::TexParameter { .. } => {}
        Command::TexImage2D {
            target,
            level,
            format,
            gl_type,
            width,
            height,
            ..
        } => {
            write_texture_image(state, *target, *level, *width, *height, *format, *gl_type)?;
        }
        Command::TexSubImage2D { .. } => {}
        Command::TexImage3D {
            target,
            level,
            width,
            height,
            format,
            gl_type,
            ..
        } => {
            write_texture_image(state, *target, *level, *width, *height, *format, *gl_type)?;
        }
        Command::TexSubImage3D { .. } => {}
        Command::TexStorage2D {
            target,
            levels,
            width,
            height,
            ..
        } => {
            let ctx = current_ctx_mut(state)?;
            let unit = ctx.bound.active_texture_unit;
            let texture_id = ctx.bound_texture_for_unit(unit, *target);
            if let Some(tex) = ctx.objects.shared.textures.get_mut(&texture_id) {
                tex.levels = (0..*levels)
                    .map(|_| TextureLevel::default())
                    .collect();
                let _ = (width, height);
            }
        }
        Command::CompressedTexImage2D {
            target,
            level,
            width,
            height,
            ..
        }
        | Command::CompressedTexSubImage2D {
            target,
            level,
            width,
            height,
            ..
        } => {
            write_texture_image(state, *target, *level, *width, *height, 0, 0)?;
        }
        Command::CopyTexImage2D { .. } => {}
        Command::EglImageTargetTexture2DOES { target, image } => {
            let ctx = current_ctx_mut(state)?;
            let unit = ctx.bound.active_texture_unit;
            let texture_id = ctx.bound_texture_for_unit(unit, *target);
            if let Some(tex) = ctx.objects.shared.textures.get_mut(&texture_id) {
                tex.egl_image = Some(*image);
            }
        }
        Command::RenderbufferStorageMultisampleEXT { .. } => {}
        Command::FramebufferTexture2DMultisampleEXT { .. } => {}
        Command::StartTilingQCOM | Command::EndTilingQCOM => {}

        Command::BindFramebuffer {
            target,
            framebuffer,
        } => {
            let ctx = current_ctx_mut(state)?;
            const FRAMEBUFFER: GlEnum = 0x8D40;
            const DRAW_FRAMEBUFFER: GlEnum = 0x8CA9;
            const READ_FRAMEBUFFER: GlEnum = 0x8CA8;
            match *target {
                FRAMEBUFFER => {
                    ctx.bound.draw_framebuffer = *framebuffer;
                    ctx.bound.read_framebuffer = *framebuffer;
                }
                DRAW_FRAMEBUFFER => ctx.bound.draw_framebuffer = *framebuffer,
                READ_FRAMEBUFFER => ctx.bound.read_framebuffer = *framebuffer,
                _ => {}
            }
        }
        Command::ReadPixels { .. } => {}
        Command::Clear { .. } => {}
        Command::Enable(pname) => {
            const FRAMEBUFFER_SRGB: GlEnum = 0x8DB9;
            let ctx = current_ctx_mut(state)?;
            if *pname == FRAMEBUFFER_SRGB {
                ctx.fragment_operations.framebuffer_srgb = true;
            }
        }
        Command::Disable(pname) => {
            const FRAMEBUFFER_SRGB: GlEnum = 0x8DB9;
            let ctx = current_ctx_mut(state)?;
            if *pname == FRAMEBUFFER_SRGB {
                ctx.fragment_operations.framebuffer_srgb = false;
            }
        }

        Command::ShaderSource { shader, source } => {
            let ctx = current_ctx_mut(state)?;
            let entry = ctx.objects.shared.shaders.entry(*shader).or_insert(Shader {
                stage: ShaderStage::Vertex,
                source: String::new(),
                compiled: false,
            });
            entry.source = source.clone();
        }
        Command::CompileShader(shader) => {
            let ctx = current_ctx_mut(state)?;
            if let Some(s) = ctx.objects.shared.shaders.get_mut(shader) {
                s.compiled = true;
            }
        }
        Command::AttachShader { program, shader } => {
            let ctx = current_ctx_mut(state)?;
            let prog = ctx
                .objects
                .shared
                .programs
                .entry(*program)
                .or_insert_with(Program::default);
            prog.shaders.push(*shader);
        }
        Command::LinkProgram { program, extras } => {
            let ctx = current_ctx_mut(state)?;
            let prog = ctx
                .objects
                .shared
                .programs
                .entry(*program)
                .or_insert_with(Program::default);
            prog.linked = true;
            for extra in extras {
                if let Extra::ProgramInfo {
                    active_uniforms,
                    active_attributes,
                } = extra
                {
                    prog.active_uniforms = active_uniforms.clone();
                    prog.active_attributes = active_attributes.clone();
                }
            }
        }
        Command::UseProgram(program) => {
            let ctx = current_ctx_mut(state)?;
            ctx.bound.program = *program;
        }
        Command::GetUniformLocation { program, name } => {
            let ctx = current_ctx_mut(state)?;
            if let Some(prog) = ctx.objects.shared.programs.get(program) {
                if let Some(info) = prog.active_uniforms.iter().find(|u| &u.name == name) {
                    let loc = info.location;
                    ctx.objects
                        .shared
                        .programs
                        .get_mut(program)
                        .unwrap()
                        .uniform_locations
                        .insert(name.clone(), loc);
                }
            }
        }
        Command::Uniform4fv { .. } => {}
        Command::ProgramBinary {
            program, extras, ..
        } => {
            let ctx = current_ctx_mut(state)?;
            let prog = ctx
                .objects
                .shared
                .programs
                .entry(*program)
                .or_insert_with(Program::default);
            prog.linked = true;
            for extra in extras {
                if let Extra::ProgramInfo {
                    active_uniforms,
                    active_attributes,
                } = extra
                {
                    prog.active_uniforms = active_uniforms.clone();
                    prog.active_attributes = active_attributes.clone();
                }
            }
        }

        Command::DrawArrays { .. } | Command::DrawElements { .. } => {
            let ctx = current_ctx_mut(state)?;
            let fbo = ctx.bound.draw_framebuffer;
            if let Some(fb) = ctx.objects.private.framebuffers.get_mut(&fbo) {
                fb.egl_image_dirty = true;
            }
        }

        Command::DebugMarker { .. }
        | Command::GetError
        | Command::GenericGet { .. }
        | Command::Other { .. } => {}
    }

    if let Some(b) = builder.as_deref_mut() {
        b.call(cmd);
    }
    Ok(())
}

fn current_ctx_mut(state: &mut State) -> Result<&mut Context> {
    state
        .current_context_mut()
        .ok_or_else(|| Error::Internal("no current context".into()))
}

fn apply_context_extra(ctx: &mut Context, extra: &Extra) {
    match extra {
        Extra::StaticContextState { major, minor } => {
            ctx.constants.version = Version::new(*major, *minor);
        }
        Extra::DynamicContextState {
            backbuffer_width,
            backbuffer_height,
            has_depth_stencil,
        } => {
            ctx.info.initialized = true;
            ctx.info.backbuffer_width = *backbuffer_width;
            ctx.info.backbuffer_height = *backbuffer_height;
            ctx.info.backbuffer_has_depth_stencil = *has_depth_stencil;
        }
        Extra::ProgramInfo { .. } | Extra::ErrorState { .. } => {}
    }
}

fn write_texture_image(
    state: &mut State,
    target: GlEnum,
    level: i32,
    width: i32,
    height: i32,
    format: GlEnum,
    gl_type: GlEnum,
) -> Result<()> {
    let ctx = current_ctx_mut(state)?;
    let unit = ctx.bound.active_texture_unit;
    let texture_id = ctx.bound_texture_for_unit(unit, target);
    let tex = ctx
        .objects
        .shared
        .textures
        .entry(texture_id)
        .or_insert_with(Texture::default);
    if tex.target.is_none() {
        tex.target = Some(target);
    }
    let level = level.max(0) as usize;
    if tex.levels.len() <= level {
        tex.levels.resize_with(level + 1, TextureLevel::default);
    }
    let img = crate::state::objects::Image {
        width: width.max(0) as u32,
        height: height.max(0) as u32,
        data_format: format,
        data_type: gl_type,
        data: Vec::new(),
    };
    let level_entry = &mut tex.levels[level];
    if level_entry.layers.is_empty() {
        level_entry.layers.push(img);
    } else {
        level_entry.layers[0] = img;
    }
    Ok(())
}
