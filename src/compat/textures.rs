//! `textureCompat`: rewrites `internalformat`/`format`/`type` triples for
//! the target profile and tracks swizzle overrides needed to emulate
//! luminance/alpha formats on core profiles.
//!
//! Grounded on `gfx-backend-gl::tex`'s `format_to_gl`-style mapping table
//! (a plain `match` from a portable format enum to concrete `GLenum`s);
//! here the match runs the other way, from one driver's enum space to
//! another's.

use crate::command::GlEnum;

const LUMINANCE: GlEnum = 0x1909;
const LUMINANCE_ALPHA: GlEnum = 0x190A;
const ALPHA: GlEnum = 0x1906;
const RED: GlEnum = 0x1903;
const GREEN: GlEnum = 0x1904;
const RG: GlEnum = 0x8227;
const RGBA: GlEnum = 0x1908;

const ONE: GlEnum = 1;
const ZERO: GlEnum = 0;

/// The result of rewriting one texture format triple for the target
/// profile: the (possibly rewritten) `internalformat`/`format`/`type`, and
/// a swizzle mask to apply if the source format has no direct equivalent
/// on a core profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureCompat {
    pub internal_format: GlEnum,
    pub format: GlEnum,
    pub gl_type: GlEnum,
    pub swizzle: Option<[GlEnum; 4]>,
}

/// Rewrite one `internalformat`/`format`/`type` triple for `target_is_es`.
/// Core desktop profiles dropped `LUMINANCE`/`LUMINANCE_ALPHA`/`ALPHA` as
/// sized/base formats; they're emulated with `RED`/`RG` plus a swizzle that
/// replicates the single channel into RGB and/or routes it to alpha.
pub fn texture_compat(target_is_es: bool, internal_format: GlEnum, format: GlEnum, gl_type: GlEnum) -> TextureCompat {
    if target_is_es {
        return TextureCompat {
            internal_format,
            format,
            gl_type,
            swizzle: None,
        };
    }
    match format {
        LUMINANCE => TextureCompat {
            internal_format: RED,
            format: RED,
            gl_type,
            swizzle: Some([RED, RED, RED, ONE]),
        },
        LUMINANCE_ALPHA => TextureCompat {
            internal_format: RG,
            format: RG,
            gl_type,
            // Alpha of the LA texture lives in RG's green channel.
            swizzle: Some([RED, RED, RED, GREEN]),
        },
        ALPHA => TextureCompat {
            internal_format: RED,
            format: RED,
            gl_type,
            swizzle: Some([ZERO, ZERO, ZERO, RED]),
        },
        _ => TextureCompat {
            internal_format,
            format,
            gl_type,
            swizzle: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_becomes_red_with_replicating_swizzle_on_desktop() {
        let c = texture_compat(false, LUMINANCE, LUMINANCE, 0x1401);
        assert_eq!(c.internal_format, RED);
        assert_eq!(c.swizzle, Some([RED, RED, RED, ONE]));
    }

    #[test]
    fn luminance_alpha_becomes_rg_with_alpha_routed_to_green() {
        let c = texture_compat(false, LUMINANCE_ALPHA, LUMINANCE_ALPHA, 0x1401);
        assert_eq!(c.internal_format, RG);
        assert_eq!(c.swizzle, Some([RED, RED, RED, GREEN]));
    }

    #[test]
    fn unrelated_formats_pass_through_unchanged() {
        let c = texture_compat(false, RGBA, RGBA, 0x1401);
        assert_eq!(c.internal_format, RGBA);
        assert_eq!(c.swizzle, None);
    }

    #[test]
    fn gles_targets_never_need_swizzle_emulation() {
        let c = texture_compat(true, LUMINANCE, LUMINANCE, 0x1401);
        assert_eq!(c.internal_format, LUMINANCE);
        assert_eq!(c.swizzle, None);
    }
}
