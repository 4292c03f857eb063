//! Client-side vertex array upgrade: when the target requires VAOs, a
//! `glVertexAttribPointer` call with no buffer bound is deferred until the
//! draw call that consumes it, at which point its data is uploaded into a
//! freshly generated buffer.

use crate::command::GlEnum;

/// One deferred attribute, recorded at `glVertexAttribPointer` time.
#[derive(Clone, Copy, Debug)]
pub struct ClientVertexAttrib {
    pub location: u32,
    pub size: i32,
    pub gl_type: GlEnum,
    pub normalized: bool,
    pub stride: i32,
    pub base_address: u64,
}

impl ClientVertexAttrib {
    fn element_size(&self) -> i32 {
        let component = gl_type_size(self.gl_type);
        component * self.size
    }

    fn effective_stride(&self) -> i32 {
        if self.stride == 0 {
            self.element_size()
        } else {
            self.stride
        }
    }

    /// The byte range `[base, base+len)` this attribute reads for vertex
    /// indices `[first, first + count)`.
    pub fn covered_range(&self, first: u32, count: u32) -> (u64, u64) {
        if count == 0 {
            return (self.base_address, 0);
        }
        let stride = self.effective_stride() as u64;
        let elem = self.element_size() as u64;
        let start = self.base_address + stride * first as u64;
        let len = stride * (count as u64 - 1) + elem;
        (start, len)
    }
}

fn gl_type_size(gl_type: GlEnum) -> i32 {
    const BYTE: GlEnum = 0x1400;
    const UNSIGNED_BYTE: GlEnum = 0x1401;
    const SHORT: GlEnum = 0x1402;
    const UNSIGNED_SHORT: GlEnum = 0x1403;
    const INT: GlEnum = 0x1404;
    const UNSIGNED_INT: GlEnum = 0x1405;
    const FLOAT: GlEnum = 0x1406;
    match gl_type {
        BYTE | UNSIGNED_BYTE => 1,
        SHORT | UNSIGNED_SHORT => 2,
        INT | UNSIGNED_INT | FLOAT => 4,
        _ => 4,
    }
}

pub const UNSIGNED_BYTE: GlEnum = 0x1401;
pub const UNSIGNED_SHORT: GlEnum = 0x1403;
pub const UNSIGNED_INT: GlEnum = 0x1405;

/// Scans raw index bytes to find `[min, max]` inclusive, the vertex index
/// range a `glDrawElements` call touches.
pub fn scan_index_range(bytes: &[u8], index_type: GlEnum, count: i32) -> Option<(u32, u32)> {
    if count <= 0 {
        return None;
    }
    let count = count as usize;
    let mut min = u32::MAX;
    let mut max = 0u32;
    match index_type {
        UNSIGNED_BYTE => {
            for i in 0..count {
                let v = *bytes.get(i)? as u32;
                min = min.min(v);
                max = max.max(v);
            }
        }
        UNSIGNED_SHORT => {
            for i in 0..count {
                let off = i * 2;
                let v = u16::from_ne_bytes([*bytes.get(off)?, *bytes.get(off + 1)?]) as u32;
                min = min.min(v);
                max = max.max(v);
            }
        }
        UNSIGNED_INT => {
            for i in 0..count {
                let off = i * 4;
                let v = u32::from_ne_bytes([
                    *bytes.get(off)?,
                    *bytes.get(off + 1)?,
                    *bytes.get(off + 2)?,
                    *bytes.get(off + 3)?,
                ]);
                min = min.min(v);
                max = max.max(v);
            }
        }
        _ => return None,
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covered_range_with_explicit_stride() {
        let attr = ClientVertexAttrib {
            location: 0,
            size: 2,
            gl_type: 0x1406, // FLOAT
            normalized: false,
            stride: 8,
            base_address: 0x1000,
        };
        let (start, len) = attr.covered_range(0, 4);
        assert_eq!(start, 0x1000);
        assert_eq!(len, 8 * 3 + 8); // 3 strides plus one element
    }

    #[test]
    fn covered_range_offsets_by_first() {
        let attr = ClientVertexAttrib {
            location: 0,
            size: 2,
            gl_type: 0x1406,
            normalized: false,
            stride: 8,
            base_address: 0x1000,
        };
        let (start, _) = attr.covered_range(2, 2);
        assert_eq!(start, 0x1000 + 16);
    }

    #[test]
    fn scan_index_range_u16() {
        let bytes: Vec<u8> = [0u16, 1, 2, 1, 2, 3]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let (min, max) = scan_index_range(&bytes, UNSIGNED_SHORT, 6).unwrap();
        assert_eq!((min, max), (0, 3));
    }
}
