use crate::{
    db::Circuit,
    element::{Element, ElementGroup, ElementId, ElementType, Skin},
};

/// A field's value across a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Shared<T> {
    Same(T),
    Many,
}

impl<T> Shared<T> {
    fn merge_by(self, value: T, eq: impl Fn(&T, &T) -> bool) -> Self {
        match self {
            Self::Same(current) if eq(&current, &value) => Self::Same(current),
            _ => Self::Many,
        }
    }

    pub fn same(&self) -> Option<&T> {
        match self {
            Self::Same(value) => Some(value),
            Self::Many => None,
        }
    }
}

impl<T: PartialEq> Shared<T> {
    fn merge(self, value: T) -> Self {
        self.merge_by(value, |a, b| a == b)
    }
}

fn nearly_equal(a: &f32, b: &f32) -> bool {
    (a - b).abs() <= f32::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Input counts every selected element accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSizeRange {
    pub min: u32,
    pub max: u32,
    pub current: Shared<u32>,
}

/// Editable fields of a group of selected elements. A field is `None` when at least one
/// element does not support it.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySelection {
    pub elements: Vec<ElementId>,
    pub label: Option<Shared<String>>,
    pub color: Option<Shared<String>>,
    pub trigger: Option<Shared<Option<char>>>,
    pub frequency: Option<Shared<f32>>,
    pub audio: Option<Shared<String>>,
    pub skin: Option<Shared<Skin>>,
    pub rotation: Option<Shared<f32>>,
    pub input_size: Option<InputSizeRange>,
    pub can_morph: bool,
    first_kind: ElementType,
    same_kind: bool,
    group: ElementGroup,
    inputs: u32,
}

/// Merges a field when every element supports it, or leaves it unset.
fn field_by<T>(
    elements: &[&Element],
    supported: impl Fn(&Element) -> bool,
    value: impl Fn(&Element) -> T,
    eq: impl Fn(&T, &T) -> bool,
) -> Option<Shared<T>> {
    let (first, rest) = elements.split_first()?;
    if !elements.iter().all(|e| supported(e)) {
        return None;
    }
    Some(
        rest.iter()
            .fold(Shared::Same(value(first)), |acc, e| acc.merge_by(value(e), &eq)),
    )
}

fn field<T: PartialEq>(
    elements: &[&Element],
    supported: impl Fn(&Element) -> bool,
    value: impl Fn(&Element) -> T,
) -> Option<Shared<T>> {
    field_by(elements, supported, value, T::eq)
}

impl PropertySelection {
    /// Merges the fields of `elements`. `None` for an empty selection.
    pub fn from_elements(elements: &[&Element]) -> Option<Self> {
        let first = *elements.first()?;

        let caps = |e: &Element| *e.capabilities();
        let label = field(elements, |e| caps(e).has_label, |e| e.label.clone());
        let color = field(elements, |e| caps(e).has_color, |e| e.color.clone());
        let trigger = field(elements, |e| caps(e).has_trigger, |e| e.trigger);
        let frequency = field_by(
            elements,
            |e| caps(e).has_frequency,
            |e| e.frequency,
            nearly_equal,
        );
        let audio = field(elements, |e| caps(e).has_audio, |e| e.audio.clone());
        let skin = field(elements, |e| caps(e).can_change_skin, |e| e.skin.clone());
        let rotation = field_by(elements, |e| caps(e).rotatable, |e| e.rotation, nearly_equal);

        let min = elements
            .iter()
            .map(|e| e.capabilities().min_inputs)
            .max()
            .unwrap_or_default();
        let max = elements
            .iter()
            .map(|e| e.capabilities().max_inputs)
            .min()
            .unwrap_or_default();
        let input_size = (min < max).then(|| InputSizeRange {
            min,
            max,
            current: elements[1..]
                .iter()
                .fold(Shared::Same(first.input_size()), |acc, e| {
                    acc.merge(e.input_size())
                }),
        });

        let can_morph = elements.iter().all(|e| {
            e.input_size() == first.input_size()
                && e.output_size() == first.output_size()
                && e.group().is_compatible(first.group())
        });
        let same_kind = elements.iter().all(|e| e.kind() == first.kind());

        Some(Self {
            elements: elements.iter().map(|e| e.id()).collect(),
            label,
            color,
            trigger,
            frequency,
            audio,
            skin,
            rotation,
            input_size,
            can_morph,
            first_kind: first.kind(),
            same_kind,
            group: first.group(),
            inputs: first.input_size(),
        })
    }

    /// Types the whole selection may turn into, leaving out the current type when everything
    /// selected already has it.
    pub fn morph_candidates(&self) -> Vec<ElementType> {
        use ElementType as T;

        if !self.can_morph {
            return Vec::new();
        }
        let candidates: &[ElementType] = match self.group {
            ElementGroup::Gate if self.inputs == 1 => &[T::Not, T::Node],
            ElementGroup::Gate => &[T::And, T::Or, T::Nand, T::Nor, T::Xor, T::Xnor],
            ElementGroup::Input | ElementGroup::StaticInput => {
                &[T::Button, T::Switch, T::Clock, T::Vcc, T::Gnd]
            }
            ElementGroup::Memory if self.inputs == 2 => &[T::DLatch, T::JkLatch],
            ElementGroup::Memory if self.inputs == 4 => &[T::DFlipFlop, T::TFlipFlop],
            ElementGroup::Output => &[T::Led, T::Buzzer],
            _ => &[],
        };
        candidates
            .iter()
            .copied()
            .filter(|ty| !self.same_kind || *ty != self.first_kind)
            .collect()
    }
}

/// Changes to apply to every selected element that supports them. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyEdit {
    pub label: Option<String>,
    pub color: Option<String>,
    /// Raw key text. Uppercased, and ignored unless it is at most one letter, digit or space.
    pub trigger: Option<String>,
    pub frequency: Option<f32>,
    pub audio: Option<String>,
    pub skin: Option<Skin>,
    pub rotation: Option<f32>,
    pub input_size: Option<u32>,
    pub morph: Option<ElementType>,
}

/// `Ok(None)` clears the trigger, `Err` means the text is not a usable key.
fn parse_trigger(text: &str) -> Result<Option<char>, ()> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) if c.is_ascii_alphanumeric() || c == ' ' => {
            Ok(Some(c.to_ascii_uppercase()))
        }
        _ => Err(()),
    }
}

impl Circuit {
    pub fn property_selection(&self, ids: &[ElementId]) -> Option<PropertySelection> {
        let elements: Vec<&Element> = ids.iter().filter_map(|id| self.element(*id)).collect();
        PropertySelection::from_elements(&elements)
    }

    /// Writes `edit` to the selected elements. Returns how many elements changed type.
    pub fn apply_edit(&mut self, ids: &[ElementId], edit: &PropertyEdit) -> usize {
        let trigger = match edit.trigger.as_deref().map(parse_trigger) {
            Some(Ok(key)) => Some(key),
            Some(Err(())) => {
                log::debug!("Ignoring trigger {:?}", edit.trigger);
                None
            }
            None => None,
        };

        let mut morphed = 0;
        for id in ids {
            if let Some(size) = edit.input_size {
                self.set_input_size(*id, size);
            }
            let Some(element) = self.element_mut(*id) else {
                continue;
            };
            let caps = *element.capabilities();
            if caps.has_label
                && let Some(label) = &edit.label
            {
                element.label.clone_from(label);
            }
            if caps.has_color
                && let Some(color) = &edit.color
            {
                element.color.clone_from(color);
            }
            if caps.has_trigger
                && let Some(key) = trigger
            {
                element.trigger = key;
            }
            if caps.has_frequency
                && let Some(frequency) = edit.frequency
            {
                element.frequency = frequency;
            }
            if caps.has_audio
                && let Some(audio) = &edit.audio
            {
                element.audio.clone_from(audio);
            }
            if caps.can_change_skin
                && let Some(skin) = &edit.skin
            {
                element.skin = skin.clone();
            }
            if caps.rotatable
                && let Some(rotation) = edit.rotation
            {
                element.rotation = rotation;
            }
            if let Some(ty) = edit.morph
                && self.morph(*id, ty)
            {
                morphed += 1;
            }
        }
        morphed
    }
}
