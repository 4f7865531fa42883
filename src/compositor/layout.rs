use crate::models::TextBox;

/// Share of the canvas dimension one pairwise adjustment may move a label.
pub const MAX_SHIFT_RATIO: f32 = 0.015;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        overlap(self.x, self.w, other.x, other.w) > 0.0
            && overlap(self.y, self.h, other.y, other.h) > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f32,
    pub y: f32,
}

impl Scale {
    /// Ratio of the rendered image to the image the boxes were computed on.
    pub fn between(final_size: (u32, u32), source_size: (u32, u32)) -> Self {
        Self {
            x: final_size.0 as f32 / source_size.0.max(1) as f32,
            y: final_size.1 as f32 / source_size.1.max(1) as f32,
        }
    }

    /// The box in rendered-image pixels.
    pub fn apply(&self, text_box: &TextBox) -> Rect {
        Rect {
            x: text_box.min_x * self.x,
            y: text_box.min_y * self.y,
            w: text_box.width() * self.x,
            h: text_box.height() * self.y,
        }
    }
}

/// Blank filler boxes sort below everything; missing z-index means 1.
pub fn effective_z_index(text_box: &TextBox) -> i64 {
    if text_box.is_blank() {
        0
    } else {
        text_box.z_index.unwrap_or(1)
    }
}

/// Stable ascending sort, so later boxes paint over earlier ones.
pub fn sort_by_z_index(boxes: &mut [TextBox]) {
    boxes.sort_by_key(effective_z_index);
}

/// Top-left of a fitted label, keeping it centred on the original region
/// when fitting made it larger.
pub fn anchor(original: &Rect, fitted_w: f32, fitted_h: f32) -> Rect {
    let mut x = original.x;
    let mut y = original.y;
    if fitted_w > original.w {
        x -= (fitted_w - original.w).abs() / 2.0;
    }
    if fitted_h > original.h {
        y -= (fitted_h - original.h).abs() / 2.0;
    }
    Rect {
        x,
        y,
        w: fitted_w,
        h: fitted_h,
    }
}

/// Nudges overlapping labels apart.
///
/// For each label `i`, every later label `j` it overlaps pushes `i` away by
/// the overlap, at most [`MAX_SHIFT_RATIO`] of the canvas per pair. Overlap
/// and direction are taken from where `i` stood before this pass reached it.
/// Moved labels are kept inside the canvas. Residual overlap is accepted.
pub fn resolve_collisions(rects: &mut [Rect], canvas_w: f32, canvas_h: f32) {
    let unit_x = MAX_SHIFT_RATIO * canvas_w;
    let unit_y = MAX_SHIFT_RATIO * canvas_h;

    for i in 0..rects.len() {
        let start = rects[i];
        for j in (i + 1)..rects.len() {
            let other = rects[j];
            let overlap_x = overlap(start.x, start.w, other.x, other.w);
            let overlap_y = overlap(start.y, start.h, other.y, other.h);
            if overlap_x <= 0.0 || overlap_y <= 0.0 {
                continue;
            }

            let shift_x = if start.x < other.x { -overlap_x } else { overlap_x };
            let shift_y = if start.y < other.y { -overlap_y } else { overlap_y };
            let shift_x = shift_x.signum() * shift_x.abs().min(unit_x);
            let shift_y = shift_y.signum() * shift_y.abs().min(unit_y);

            let current = &mut rects[i];
            current.x = clamp_axis(current.x + shift_x, canvas_w - start.w);
            current.y = clamp_axis(current.y + shift_y, canvas_h - start.h);
        }
    }
}

fn overlap(a: f32, a_len: f32, b: f32, b_len: f32) -> f32 {
    (a + a_len).min(b + b_len) - a.max(b)
}

/// Labels larger than the canvas are pinned to the origin.
fn clamp_axis(value: f32, max: f32) -> f32 {
    value.min(max).max(0.0)
}
