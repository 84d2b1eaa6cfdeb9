use std::fmt::Display;

use egui::Pos2;

use crate::db::PortId;

/// Identity of an element, issued by [`crate::factory::IdentityAllocator`].
#[derive(
    serde::Deserialize, serde::Serialize, Copy, Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd,
)]
pub struct ElementId(pub u64);

impl Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(serde::Deserialize, serde::Serialize, PartialEq, Eq, Hash, Copy, Debug, Clone)]
pub enum ElementType {
    Unknown,
    Button,
    Switch,
    Clock,
    Vcc,
    Gnd,
    Led,
    Buzzer,
    Display,
    Not,
    Node,
    And,
    Or,
    Nand,
    Nor,
    Xor,
    Xnor,
    Mux,
    Demux,
    DLatch,
    JkLatch,
    SrLatch,
    TLatch,
    DFlipFlop,
    JkFlipFlop,
    SrFlipFlop,
    TFlipFlop,
    Ic,
}

impl ElementType {
    /// Stable tag written to documents.
    pub fn tag(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Button => 1,
            Self::Switch => 2,
            Self::Clock => 3,
            Self::Vcc => 4,
            Self::Gnd => 5,
            Self::Led => 6,
            Self::Buzzer => 7,
            Self::Display => 8,
            Self::Not => 9,
            Self::Node => 10,
            Self::And => 11,
            Self::Or => 12,
            Self::Nand => 13,
            Self::Nor => 14,
            Self::Xor => 15,
            Self::Xnor => 16,
            Self::Mux => 17,
            Self::Demux => 18,
            Self::DLatch => 19,
            Self::JkLatch => 20,
            Self::SrLatch => 21,
            Self::TLatch => 22,
            Self::DFlipFlop => 23,
            Self::JkFlipFlop => 24,
            Self::SrFlipFlop => 25,
            Self::TFlipFlop => 26,
            Self::Ic => 27,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        let ty = match tag {
            0 => Self::Unknown,
            1 => Self::Button,
            2 => Self::Switch,
            3 => Self::Clock,
            4 => Self::Vcc,
            5 => Self::Gnd,
            6 => Self::Led,
            7 => Self::Buzzer,
            8 => Self::Display,
            9 => Self::Not,
            10 => Self::Node,
            11 => Self::And,
            12 => Self::Or,
            13 => Self::Nand,
            14 => Self::Nor,
            15 => Self::Xor,
            16 => Self::Xnor,
            17 => Self::Mux,
            18 => Self::Demux,
            19 => Self::DLatch,
            20 => Self::JkLatch,
            21 => Self::SrLatch,
            22 => Self::TLatch,
            23 => Self::DFlipFlop,
            24 => Self::JkFlipFlop,
            25 => Self::SrFlipFlop,
            26 => Self::TFlipFlop,
            27 => Self::Ic,
            _ => return None,
        };
        Some(ty)
    }
}

#[derive(serde::Deserialize, serde::Serialize, PartialEq, Eq, Hash, Copy, Debug, Clone)]
pub enum ElementGroup {
    Unknown,
    Other,
    Ic,
    Gate,
    Input,
    StaticInput,
    Memory,
    Output,
    Mux,
}

impl ElementGroup {
    /// Buttons and switches may turn into constant sources and back.
    pub fn is_compatible(self, other: Self) -> bool {
        self == other
            || matches!(
                (self, other),
                (Self::Input, Self::StaticInput) | (Self::StaticInput, Self::Input)
            )
    }
}

/// What a kind of element supports, fixed by its type.
#[derive(serde::Deserialize, serde::Serialize, Copy, Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub min_inputs: u32,
    pub max_inputs: u32,
    pub min_outputs: u32,
    pub max_outputs: u32,
    pub has_label: bool,
    pub has_color: bool,
    pub has_trigger: bool,
    pub has_frequency: bool,
    pub has_audio: bool,
    pub can_change_skin: bool,
    pub rotatable: bool,
}

impl Capabilities {
    pub const fn ports(inputs: (u32, u32), outputs: (u32, u32)) -> Self {
        Self {
            min_inputs: inputs.0,
            max_inputs: inputs.1,
            min_outputs: outputs.0,
            max_outputs: outputs.1,
            has_label: false,
            has_color: false,
            has_trigger: false,
            has_frequency: false,
            has_audio: false,
            can_change_skin: false,
            rotatable: true,
        }
    }

    pub const fn with_label(mut self) -> Self {
        self.has_label = true;
        self
    }

    pub const fn with_color(mut self) -> Self {
        self.has_color = true;
        self
    }

    pub const fn with_trigger(mut self) -> Self {
        self.has_trigger = true;
        self
    }

    pub const fn with_frequency(mut self) -> Self {
        self.has_frequency = true;
        self
    }

    pub const fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self
    }

    pub const fn with_skin(mut self) -> Self {
        self.can_change_skin = true;
        self
    }

    pub fn accepts_inputs(&self, count: u32) -> bool {
        (self.min_inputs..=self.max_inputs).contains(&count)
    }

    pub fn accepts_outputs(&self, count: u32) -> bool {
        (self.min_outputs..=self.max_outputs).contains(&count)
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub enum Skin {
    #[default]
    Default,
    Custom(String),
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct Element {
    id: ElementId,
    kind: ElementType,
    group: ElementGroup,
    capabilities: Capabilities,
    /// Absolute position of the element center on the canvas.
    pub pos: Pos2,
    pub rotation: f32,
    pub label: String,
    pub color: String,
    pub audio: String,
    pub trigger: Option<char>,
    pub frequency: f32,
    pub skin: Skin,
    pub(crate) inputs: Vec<PortId>,
    pub(crate) outputs: Vec<PortId>,
}

impl Element {
    /// A detached element. The factory assigns its identity.
    pub fn new(kind: ElementType, group: ElementGroup, capabilities: Capabilities) -> Self {
        Self {
            id: ElementId(0),
            kind,
            group,
            capabilities,
            pos: Pos2::ZERO,
            rotation: 0.0,
            label: String::new(),
            color: if capabilities.has_color {
                "White".to_owned()
            } else {
                String::new()
            },
            audio: String::new(),
            trigger: None,
            frequency: if capabilities.has_frequency { 1.0 } else { 0.0 },
            skin: Skin::Default,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn set_id(&mut self, id: ElementId) {
        self.id = id;
    }

    pub fn kind(&self) -> ElementType {
        self.kind
    }

    pub fn group(&self) -> ElementGroup {
        self.group
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }

    pub fn input_size(&self) -> u32 {
        self.inputs.len() as u32
    }

    pub fn output_size(&self) -> u32 {
        self.outputs.len() as u32
    }

    /// Takes type, group and capabilities from `template`, keeping everything else.
    pub(crate) fn morph_into(&mut self, template: &Self) {
        self.kind = template.kind;
        self.group = template.group;
        self.capabilities = template.capabilities;
        if !self.capabilities.can_change_skin {
            self.skin = Skin::Default;
        }
    }
}
