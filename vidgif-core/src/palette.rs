//! Palette generation (median cut) and palette application (nearest colour).

use std::collections::HashMap;

/// Largest palette a GIF frame can carry.
pub const MAX_COLORS: usize = 256;

/// Colour table of an indexed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new(colors: Vec<[u8; 3]>) -> Self {
        debug_assert!(colors.len() <= MAX_COLORS);
        Self { colors }
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Flat `r, g, b, r, g, b, ...` table as GIF expects it.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }

    /// Index of the closest entry (squared euclidean distance in RGB).
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (idx, color) in self.colors.iter().enumerate() {
            let dist = distance_sq(*color, rgb);
            if dist < best_dist {
                best = idx;
                best_dist = dist;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }

    /// Map a packed RGB24 buffer onto palette indices.
    pub fn apply(&self, rgb: &[u8]) -> Vec<u8> {
        let mut cache: HashMap<u32, u8> = HashMap::new();
        rgb.chunks_exact(3)
            .map(|px| {
                let color = [px[0], px[1], px[2]];
                *cache
                    .entry(pack(color))
                    .or_insert_with(|| self.nearest(color))
            })
            .collect()
    }
}

fn distance_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i32 - y as i32;
            (d * d) as u32
        })
        .sum()
}

fn pack(c: [u8; 3]) -> u32 {
    (c[0] as u32) << 16 | (c[1] as u32) << 8 | c[2] as u32
}

fn unpack(v: u32) -> [u8; 3] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

// ============================================================================
// Median Cut
// ============================================================================

struct ColorBox {
    start: usize,
    end: usize,
}

impl ColorBox {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// (axis, range) of the widest channel in `entries`.
fn widest_axis(entries: &[([u8; 3], u32)]) -> (usize, u8) {
    let mut lo = [u8::MAX; 3];
    let mut hi = [0u8; 3];
    for (color, _) in entries {
        for axis in 0..3 {
            lo[axis] = lo[axis].min(color[axis]);
            hi[axis] = hi[axis].max(color[axis]);
        }
    }
    (0..3)
        .map(|axis| (axis, hi[axis].saturating_sub(lo[axis])))
        .max_by_key(|&(axis, range)| (range, std::cmp::Reverse(axis)))
        .unwrap_or((0, 0))
}

fn average(entries: &[([u8; 3], u32)]) -> [u8; 3] {
    let mut sum = [0u64; 3];
    let mut weight = 0u64;
    for (color, count) in entries {
        for axis in 0..3 {
            sum[axis] += color[axis] as u64 * *count as u64;
        }
        weight += *count as u64;
    }
    if weight == 0 {
        return [0, 0, 0];
    }
    [
        ((sum[0] + weight / 2) / weight) as u8,
        ((sum[1] + weight / 2) / weight) as u8,
        ((sum[2] + weight / 2) / weight) as u8,
    ]
}

/// Build a palette of at most `max_colors` entries for a packed RGB24 buffer.
///
/// Boxes are split at the weighted median of their widest channel until the
/// colour budget is spent or every box holds a single colour. A frame with
/// no more distinct colours than the budget gets them back exactly.
pub fn median_cut(rgb: &[u8], max_colors: usize) -> Palette {
    let max_colors = max_colors.clamp(1, MAX_COLORS);

    let mut histogram: HashMap<u32, u32> = HashMap::new();
    for px in rgb.chunks_exact(3) {
        *histogram.entry(pack([px[0], px[1], px[2]])).or_insert(0) += 1;
    }
    if histogram.is_empty() {
        return Palette::new(vec![[0, 0, 0]]);
    }

    let mut keys: Vec<(u32, u32)> = histogram.into_iter().collect();
    keys.sort_unstable_by_key(|&(key, _)| key);
    let mut entries: Vec<([u8; 3], u32)> = keys.into_iter().map(|(k, n)| (unpack(k), n)).collect();

    let mut boxes = vec![ColorBox { start: 0, end: entries.len() }];
    while boxes.len() < max_colors {
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1)
            .map(|(idx, b)| (idx, widest_axis(&entries[b.start..b.end])))
            .max_by_key(|&(idx, (_, range))| (range, std::cmp::Reverse(idx)));

        let Some((idx, (axis, _))) = candidate else {
            break;
        };

        let (start, end) = (boxes[idx].start, boxes[idx].end);
        let slice = &mut entries[start..end];
        slice.sort_by_key(|(color, _)| (color[axis], pack(*color)));

        let total: u64 = slice.iter().map(|(_, n)| *n as u64).sum();
        let mut acc = 0u64;
        let mut split = start + slice.len() / 2;
        for (offset, (_, n)) in slice.iter().enumerate() {
            acc += *n as u64;
            if acc * 2 >= total {
                split = start + offset + 1;
                break;
            }
        }
        let split = split.clamp(start + 1, end - 1);

        boxes[idx] = ColorBox { start, end: split };
        boxes.push(ColorBox { start: split, end });
    }

    Palette::new(boxes.iter().map(|b| average(&entries[b.start..b.end])).collect())
}

/// Palette size for a colour depth of `depth` bits (1..=8).
pub fn colors_for_depth(depth: u8) -> usize {
    if depth >= 8 {
        MAX_COLORS
    } else {
        MAX_COLORS >> (8 - depth.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| {
                let v = (i * 255 / n.max(1)) as u8;
                [v, 255 - v, v / 2]
            })
            .collect()
    }

    #[test]
    fn test_exact_when_under_budget() {
        let rgb = [255, 0, 0, 0, 255, 0, 255, 0, 0, 0, 0, 255];
        let palette = median_cut(&rgb, 16);
        assert_eq!(palette.len(), 3);
        for color in [[255, 0, 0], [0, 255, 0], [0, 0, 255]] {
            assert!(palette.colors().contains(&color));
        }

        let indices = palette.apply(&rgb);
        assert_eq!(indices[0], indices[2]);
        assert_eq!(palette.colors()[indices[1] as usize], [0, 255, 0]);
    }

    #[test]
    fn test_color_limit_respected() {
        let rgb = gradient(4096);
        for max in [2, 4, 16, 256] {
            let palette = median_cut(&rgb, max);
            assert!(palette.len() <= max, "{} > {}", palette.len(), max);
            assert!(palette.len() >= max.min(2));
        }
    }

    #[test]
    fn test_deterministic() {
        let rgb = gradient(1000);
        assert_eq!(median_cut(&rgb, 32), median_cut(&rgb, 32));
    }

    #[test]
    fn test_empty_input() {
        let palette = median_cut(&[], 256);
        assert_eq!(palette.len(), 1);
    }

    #[test]
    fn test_nearest() {
        let palette = Palette::new(vec![[0, 0, 0], [128, 128, 128], [255, 255, 255]]);
        assert_eq!(palette.nearest([10, 10, 10]), 0);
        assert_eq!(palette.nearest([140, 120, 130]), 1);
        assert_eq!(palette.nearest([250, 250, 255]), 2);
        assert_eq!(palette.to_rgb_bytes().len(), 9);
    }

    #[test]
    fn test_colors_for_depth() {
        assert_eq!(colors_for_depth(8), 256);
        assert_eq!(colors_for_depth(7), 128);
        assert_eq!(colors_for_depth(4), 16);
        assert_eq!(colors_for_depth(1), 2);
    }
}
