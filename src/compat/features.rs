//! Device descriptor parsing and tri-state feature derivation.
//!
//! Grounded on `gfx-backend-gl::info::{Version, get}`: `Version::parse`
//! reuses the lenient grammar already implemented for the capture's own
//! `Constants` in `crate::state::Version`, and `Features::derive` mirrors
//! `info::get`'s pattern of deriving a `Capabilities` struct from version-or-
//! extension checks (`is_version_or_extension_supported`).

use fxhash::FxHashSet;

use crate::command::GlEnum;
use crate::state::{Constants, Version};

/// Tri-state support for a capability that differs across GL profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    Unsupported,
    Supported,
    Required,
}

impl Support {
    pub fn is_supported(self) -> bool {
        self != Support::Unsupported
    }
}

/// `{ version, vendor, extensions, uniformBufferAlignment }`.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub is_es: bool,
    pub version: String,
    pub vendor: String,
    pub extensions: Vec<String>,
    pub uniform_buffer_alignment: i64,
}

/// Known compressed-texture-format extensions and the `internalformat`
/// enums they unlock. Not exhaustive; covers the formats the literal
/// scenarios and the rest of the pack commonly exercise.
const ETC2_RGB8: GlEnum = 0x9274;
const ETC2_RGBA8: GlEnum = 0x9278;
const S3TC_RGB_DXT1: GlEnum = 0x83F0;
const S3TC_RGBA_DXT5: GlEnum = 0x83F3;
const ASTC_4X4: GlEnum = 0x93B0;

fn formats_for_extension(ext: &str) -> &'static [GlEnum] {
    match ext {
        "GL_OES_compressed_ETC2_RGB8_texture" => &[ETC2_RGB8],
        "GL_OES_compressed_ETC2_RGBA8_texture" => &[ETC2_RGBA8],
        "GL_EXT_texture_compression_s3tc" => &[S3TC_RGB_DXT1, S3TC_RGBA_DXT5],
        "GL_KHR_texture_compression_astc_ldr" => &[ASTC_4X4],
        _ => &[],
    }
}

/// Tri-state fields for the capabilities that differ across capture/target
/// profiles, plus the supported compressed formats and the mipmap-hint
/// flag.
#[derive(Clone, Debug)]
pub struct Features {
    pub vertex_half_float_oes: Support,
    pub egl_image_external: Support,
    pub texture_multisample: Support,
    pub vertex_array_objects: Support,
    pub framebuffer_srgb: Support,
    pub compressed_texture_formats: FxHashSet<GlEnum>,
    pub generate_mipmap_hint: bool,
}

impl Features {
    pub fn derive(descriptor: &DeviceDescriptor) -> Features {
        let version = Version::parse(&descriptor.version).unwrap_or_else(|_| Version::new(2, 0));
        Self::derive_raw(descriptor.is_es, &version, &descriptor.extensions)
    }

    /// Derives the *source* features directly from the capture context's
    /// own reported constants, as required on every
    /// `EglMakeCurrent` ("a matching source features record is derived
    /// from the capture context's own constants").
    pub fn derive_from_constants(constants: &Constants) -> Features {
        Self::derive_raw(constants.is_es, &constants.version, &constants.extensions)
    }

    fn derive_raw(is_es: bool, version: &Version, extensions: &[String]) -> Features {
        let has_ext = |name: &str| extensions.iter().any(|e| e == name);
        let supported_or_required = |major, minor, ext: &str, required_if: bool| {
            if required_if {
                Support::Required
            } else if version >= &Version::new(major, minor) || has_ext(ext) {
                Support::Supported
            } else {
                Support::Unsupported
            }
        };

        let vertex_array_objects = supported_or_required(
            3,
            0,
            if is_es {
                "GL_OES_vertex_array_object"
            } else {
                "GL_ARB_vertex_array_object"
            },
            !is_es && version >= &Version::new(3, 0),
        );

        let vertex_half_float_oes = supported_or_required(
            3,
            0,
            "GL_OES_vertex_half_float",
            false,
        );

        let egl_image_external = if !is_es {
            // `GL_OES_EGL_image_external` has no desktop GL equivalent.
            Support::Unsupported
        } else if has_ext("GL_OES_EGL_image_external") {
            Support::Supported
        } else {
            Support::Unsupported
        };

        let texture_multisample = supported_or_required(
            3,
            1,
            if is_es {
                "GL_OES_texture_storage_multisample_2d_array"
            } else {
                "GL_ARB_texture_multisample"
            },
            false,
        );

        let framebuffer_srgb = supported_or_required(
            3,
            0,
            if is_es {
                "GL_EXT_sRGB_write_control"
            } else {
                "GL_ARB_framebuffer_sRGB"
            },
            !is_es && (version >= &Version::new(3, 0) || has_ext("GL_ARB_framebuffer_sRGB")),
        );

        let mut compressed_texture_formats = FxHashSet::default();
        for ext in extensions {
            for fmt in formats_for_extension(ext) {
                compressed_texture_formats.insert(*fmt);
            }
        }

        Features {
            vertex_half_float_oes,
            egl_image_external,
            texture_multisample,
            vertex_array_objects,
            framebuffer_srgb,
            compressed_texture_formats,
            generate_mipmap_hint: !is_es || version >= &Version::new(3, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(is_es: bool, version: &str, exts: &[&str]) -> DeviceDescriptor {
        DeviceDescriptor {
            is_es,
            version: version.to_string(),
            vendor: "Test".into(),
            extensions: exts.iter().map(|s| s.to_string()).collect(),
            uniform_buffer_alignment: 256,
        }
    }

    #[test]
    fn desktop_gl3_requires_vaos() {
        let f = Features::derive(&desc(false, "3.0", &[]));
        assert_eq!(f.vertex_array_objects, Support::Required);
    }

    #[test]
    fn gles2_without_extension_lacks_vaos() {
        let f = Features::derive(&desc(true, "2.0", &[]));
        assert_eq!(f.vertex_array_objects, Support::Unsupported);
    }

    #[test]
    fn gles2_with_oes_extension_supports_vaos_but_does_not_require() {
        let f = Features::derive(&desc(true, "2.0", &["GL_OES_vertex_array_object"]));
        assert_eq!(f.vertex_array_objects, Support::Supported);
    }

    #[test]
    fn egl_image_external_never_supported_on_desktop() {
        let f = Features::derive(&desc(false, "4.5", &["GL_OES_EGL_image_external"]));
        assert_eq!(f.egl_image_external, Support::Unsupported);
    }

    #[test]
    fn compressed_formats_come_from_extension_list() {
        let f = Features::derive(&desc(
            true,
            "2.0",
            &["GL_OES_compressed_ETC2_RGB8_texture"],
        ));
        assert!(f.compressed_texture_formats.contains(&ETC2_RGB8));
        assert!(!f.compressed_texture_formats.contains(&S3TC_RGB_DXT1));
    }
}
