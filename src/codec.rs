//! CodecV1 pulse-code decoding.
//!
//! HiFi kinetic tags (fi/ri/fp/rp) store inter-pulse distances and pulse
//! widths as lossy 8-bit codes. CodecV1 splits the code space into four
//! bands of decreasing resolution; decoding maps each code back to a frame
//! count. The table is process-wide and immutable.

/// Code → frame count, one entry per possible u8 code.
pub static CODE_TO_FRAMES: [f64; 256] = build_codec_v1();

const fn build_codec_v1() -> [f64; 256] {
    let mut table = [0.0f64; 256];
    let mut code = 0usize;
    while code < 256 {
        let frames = match code {
            0..=63 => code,
            64..=127 => 64 + (code - 64) * 2,
            128..=191 => 192 + (code - 128) * 4,
            _ => 448 + (code - 192) * 8,
        };
        table[code] = frames as f64;
        code += 1;
    }
    table
}

/// Decode a slice of pulse codes to frame counts.
pub fn decode_frames(codes: &[u8]) -> Vec<f64> {
    codes.iter().map(|&c| CODE_TO_FRAMES[c as usize]).collect()
}

/// Pass codes through without decoding (`--no-decode`).
pub fn raw_frames(codes: &[u8]) -> Vec<f64> {
    codes.iter().map(|&c| c as f64).collect()
}
