use std::fmt::Display;

use egui::{Vec2, vec2};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Input,
    Output,
}

impl PortKind {
    pub fn is_output(self) -> bool {
        self == Self::Output
    }
}

impl Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => f.write_str("Input"),
            Self::Output => f.write_str("Output"),
        }
    }
}

/// Placement of one port relative to the center of its element.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PortGraphics {
    pub kind: PortKind,
    pub offset: Vec2,
}

/// Lays out `inputs` ports on the left edge and `outputs` ports on the right edge of an
/// element of `size`. A lone port on a side is centered, several are spread evenly from the
/// top edge to the bottom edge. Inputs come first in the returned list.
pub fn port_layout(inputs: usize, outputs: usize, size: Vec2) -> Vec<PortGraphics> {
    let mut out = Vec::with_capacity(inputs + outputs);
    out.extend(side_offsets(inputs, -size.x / 2.0, size.y).map(|offset| PortGraphics {
        kind: PortKind::Input,
        offset,
    }));
    out.extend(side_offsets(outputs, size.x / 2.0, size.y).map(|offset| PortGraphics {
        kind: PortKind::Output,
        offset,
    }));
    out
}

fn side_offsets(count: usize, x: f32, height: f32) -> impl Iterator<Item = Vec2> {
    let top_y = -height / 2.0;
    (0..count).map(move |i| {
        let y = if count == 1 {
            0.0 // Centered
        } else {
            let spacing = height / (count - 1) as f32;
            top_y + i as f32 * spacing
        };
        vec2(x, y)
    })
}
