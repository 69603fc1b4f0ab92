//! Diagnostic test pattern for synthetic frames.

/// glibc-style LCG, reproducible across platforms.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Render one channel of the diagnostic pattern as 16-bit intensities.
///
/// Layers, bottom to top:
/// - checkerboard background with per-frame noise
/// - horizontal gradient bars at top and bottom
/// - solid triangle in the top-left corner (orientation marker)
/// - center crosshair
/// - Gaussian hotspot orbiting the center; each channel runs a third of a
///   turn ahead of the previous one so channels are distinguishable
/// - low 4 bits of the frame number as dots below the corner marker
///
/// Images smaller than 64 px in either direction get a diagonal gradient
/// shifted by frame number instead.
pub fn generate_test_pattern(width: u32, height: u32, frame_num: u64, channel: u32) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let mut buffer = vec![0u16; w * h];

    if w < 64 || h < 64 {
        let span = (w + h).max(1);
        for y in 0..h {
            for x in 0..w {
                let pos = (x + y + frame_num as usize + channel as usize) % span;
                buffer[y * w + x] = (pos * 65535 / span) as u16;
            }
        }
        return buffer;
    }

    let short_side = width.min(height) as usize;
    let checker = (short_side / 32).max(1);
    let corner = (short_side / 8).max(1);
    let arm = (short_side / 6).max(1);
    let bar_height = (h / 10).max(1);
    let (cx, cy) = (w / 2, h / 2);

    let orbit = (short_side / 5) as f64;
    let angle = frame_num as f64 * 0.05 + channel as f64 * std::f64::consts::TAU / 3.0;
    let spot_x = cx as f64 + orbit * angle.cos();
    let spot_y = cy as f64 + orbit * angle.sin();
    let sigma = 30.0f64;
    // Beyond 4 sigma the Gaussian contributes nothing visible.
    let reach = (4.0 * sigma) as i64;

    let frame_seed = frame_num.wrapping_mul(2654435761) ^ (u64::from(channel) << 32);

    for y in 0..h {
        let row = &mut buffer[y * w..(y + 1) * w];
        for (x, px) in row.iter_mut().enumerate() {
            let idx = (y * w + x) as u64;
            let noise = ((prng(frame_seed ^ idx) & 0xFFF) as i32) - 2048;
            let base = if ((x / checker) + (y / checker)) % 2 == 0 {
                16384
            } else {
                19660
            };
            let mut value = (base + noise).clamp(0, 65535) as u32;

            if y < bar_height {
                value = (x * 65535 / w) as u32;
            } else if y >= h - bar_height {
                value = ((w - 1 - x) * 65535 / w) as u32;
            }

            if x + y < corner {
                value = 65535;
            }

            let on_horizontal = y.abs_diff(cy) <= 1 && x.abs_diff(cx) <= arm;
            let on_vertical = x.abs_diff(cx) <= 1 && y.abs_diff(cy) <= arm;
            if on_horizontal || on_vertical {
                value = 65535;
            }

            let dot_row = corner + 20;
            if y.abs_diff(dot_row) <= 4 {
                for bit in 0..4usize {
                    let dot_x = 10 + bit * 15;
                    if x.abs_diff(dot_x) <= 4 {
                        value = if (frame_num >> bit) & 1 == 1 { 65535 } else { 6553 };
                    }
                }
            }

            let dx = x as f64 - spot_x;
            let dy = y as f64 - spot_y;
            if (dx as i64).abs() <= reach && (dy as i64).abs() <= reach {
                let gaussian = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                value += (gaussian * 32768.0) as u32;
            }

            *px = value.min(65535) as u16;
        }
    }

    buffer
}

/// Render the pattern straight into a channel plane.
///
/// Two-byte pixels are written Little Endian; one-byte pixels keep the high
/// byte of each intensity.
pub fn fill_channel(
    plane: &mut [u8],
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    frame_num: u64,
    channel: u32,
) {
    let pixels = generate_test_pattern(width, height, frame_num, channel);
    match bytes_per_pixel {
        1 => {
            for (dst, px) in plane.iter_mut().zip(&pixels) {
                *dst = (px >> 8) as u8;
            }
        }
        _ => {
            let step = bytes_per_pixel.max(2) as usize;
            for (dst, px) in plane.chunks_exact_mut(step).zip(&pixels) {
                dst[..2].copy_from_slice(&px.to_le_bytes());
            }
        }
    }
}
