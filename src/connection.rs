use std::io::{self, Read, Write};

use egui::epaint::CubicBezierShape;
use egui::{Color32, Pos2, Stroke, pos2};

use crate::db::{InputPort, OutputPort, PortId};

/// Size in bytes of one persisted connection.
pub const RECORD_LEN: usize = 16;

/// Written in place of a missing port.
pub const NO_PORT: u64 = 0;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Inactive,
    Active,
    Invalid,
}

/// Cubic curve a wire is drawn along.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq)]
pub struct WirePath {
    pub start: Pos2,
    pub control1: Pos2,
    pub control2: Pos2,
    pub end: Pos2,
}

impl WirePath {
    /// The first control point hugs the start vertically and the second hugs the end, which
    /// gives wires their slanted S shape.
    pub fn between(start: Pos2, end: Pos2) -> Self {
        let dx = end.x - start.x;
        let dy = end.y - start.y;
        Self {
            start,
            control1: pos2(start.x + dx * 0.25, start.y + dy * 0.1),
            control2: pos2(start.x + dx * 0.75, start.y + dy * 0.9),
            end,
        }
    }

    pub fn points(&self) -> [Pos2; 4] {
        [self.start, self.control1, self.control2, self.end]
    }

    pub fn to_shape(&self, stroke: Stroke) -> CubicBezierShape {
        CubicBezierShape::from_points_stroke(self.points(), false, Color32::TRANSPARENT, stroke)
    }
}

impl Default for WirePath {
    fn default() -> Self {
        Self::between(Pos2::ZERO, Pos2::ZERO)
    }
}

/// Angle in degrees of the line `from -> to`: 0 points right and angles grow
/// counter-clockwise on a y-down canvas. Always in `[0, 360)`.
pub fn line_angle(from: Pos2, to: Pos2) -> f32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    if dx == 0.0 && dy == 0.0 {
        return 0.0;
    }
    let degrees = (-dy).atan2(dx).to_degrees();
    if degrees < 0.0 { degrees + 360.0 } else { degrees }
}

/// The two raw port identities of a persisted connection, in stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub first: u64,
    pub second: u64,
}

impl ConnectionRecord {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.first.to_be_bytes())?;
        writer.write_all(&self.second.to_be_bytes())
    }

    pub fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        reader.read_exact(&mut first)?;
        reader.read_exact(&mut second)?;
        Ok(Self {
            first: u64::from_be_bytes(first),
            second: u64::from_be_bytes(second),
        })
    }
}

/// A wire from an output port to an input port.
///
/// Port references are non-owning. Attaching and detaching go through
/// [`crate::db::Circuit::set_start`] and [`crate::db::Circuit::set_end`], which keep the
/// ports' back-references in step.
#[derive(Debug, Clone, Default)]
pub struct Connection {
    pub(crate) start: Option<OutputPort>,
    pub(crate) end: Option<InputPort>,
    start_pos: Pos2,
    end_pos: Pos2,
    status: ConnectionStatus,
    path: WirePath,
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Option<OutputPort> {
        self.start
    }

    pub fn end(&self) -> Option<InputPort> {
        self.end
    }

    pub fn is_complete(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    pub fn start_pos(&self) -> Pos2 {
        self.start_pos
    }

    pub fn end_pos(&self) -> Pos2 {
        self.end_pos
    }

    /// Moves the loose start of a wire being dragged.
    pub fn set_start_pos(&mut self, pos: Pos2) {
        self.start_pos = pos;
    }

    pub fn set_end_pos(&mut self, pos: Pos2) {
        self.end_pos = pos;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn path(&self) -> &WirePath {
        &self.path
    }

    pub fn compute_path(&mut self) -> &WirePath {
        self.path = WirePath::between(self.start_pos, self.end_pos);
        &self.path
    }

    /// Opposite end of `port`, or `None` when `port` is not one of this wire's ends.
    pub fn other_port(&self, port: PortId) -> Option<PortId> {
        let start = self.start.map(OutputPort::id);
        let end = self.end.map(InputPort::id);
        if start == Some(port) {
            end
        } else if end == Some(port) {
            start
        } else {
            None
        }
    }

    /// Returns the start without checking that `_port` is this wire's end. Callers must know
    /// it is.
    pub fn other_port_of_input_unchecked(&self, _port: InputPort) -> Option<OutputPort> {
        self.start
    }

    /// Returns the end without checking that `_port` is this wire's start. Callers must know
    /// it is.
    pub fn other_port_of_output_unchecked(&self, _port: OutputPort) -> Option<InputPort> {
        self.end
    }

    pub fn record(&self) -> ConnectionRecord {
        ConnectionRecord {
            first: self.start.map_or(NO_PORT, |p| p.id().persisted()),
            second: self.end.map_or(NO_PORT, |p| p.id().persisted()),
        }
    }

    /// Writes the start identity then the end identity, 8 bytes each.
    pub fn serialize(&self, writer: &mut impl Write) -> io::Result<()> {
        self.record().write_to(writer)
    }
}
