use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use egui::{Pos2, pos2};

use crate::{
    config::WiringConfig,
    connection::ConnectionRecord,
    db::{Circuit, PortId},
    element::{ElementId, ElementType, Skin},
    factory::{ElementFactory, IdentityAllocator},
};

pub const MAGIC: &[u8; 4] = b"WIRD";
pub const VERSION: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read or write document: {0}")]
    Io(#[from] io::Error),
    #[error("not a circuit document")]
    BadMagic,
    #[error("unsupported document version {0}")]
    UnsupportedVersion(u16),
    #[error("document contains invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid trigger key code {0:#x}")]
    InvalidTrigger(u32),
    #[error("element ids in the document exceed the identity space")]
    IdentityOverflow,
}

/// What a load had to leave behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LoadReport {
    /// Elements whose type this build cannot construct.
    pub skipped_elements: Vec<ElementId>,
    /// Connections whose ports could not be resolved.
    pub dropped_connections: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_elements.is_empty() && self.dropped_connections == 0
    }
}

impl Circuit {
    pub fn save(&self, writer: &mut impl Write) -> Result<(), DocumentError> {
        writer.write_all(MAGIC)?;
        write_u16(writer, VERSION)?;

        let allocator = self.factory().allocator();
        write_u64(writer, allocator.next_fresh())?;
        write_len(writer, allocator.recycled().len())?;
        for id in allocator.recycled() {
            write_u64(writer, id.0)?;
        }

        let elements: Vec<_> = self.elements().collect();
        write_len(writer, elements.len())?;
        for element in elements {
            write_u64(writer, element.id().0)?;
            write_u16(writer, element.kind().tag())?;
            write_f32(writer, element.pos.x)?;
            write_f32(writer, element.pos.y)?;
            write_f32(writer, element.rotation)?;
            write_str(writer, &element.label)?;
            write_str(writer, &element.color)?;
            write_str(writer, &element.audio)?;
            match &element.skin {
                Skin::Default => write_str(writer, "")?,
                Skin::Custom(path) => write_str(writer, path)?,
            }
            write_u32(writer, element.trigger.map_or(0, u32::from))?;
            write_f32(writer, element.frequency)?;
            for side in [element.inputs(), element.outputs()] {
                write_len(writer, side.len())?;
                for port in side {
                    write_u64(writer, port.persisted())?;
                }
            }
        }

        // Dangling wires only exist while being dragged.
        let complete: Vec<_> = self
            .connections()
            .filter(|(_, conn)| conn.is_complete())
            .map(|(id, _)| id)
            .collect();
        write_len(writer, complete.len())?;
        for id in complete {
            self.serialize_connection(id, writer)?;
        }
        Ok(())
    }

    /// Loads a document with the default element catalog and wiring config.
    pub fn load(reader: &mut impl Read) -> Result<(Self, LoadReport), DocumentError> {
        Self::load_with(
            ElementFactory::with_default_catalog(),
            WiringConfig::default(),
            reader,
        )
    }

    /// Loads a document, constructing elements through `factory`.
    ///
    /// Elements the factory cannot build are skipped and their identities queued for reuse.
    /// Connections that do not resolve to a loaded output and input are dropped.
    pub fn load_with(
        mut factory: ElementFactory,
        config: WiringConfig,
        reader: &mut impl Read,
    ) -> Result<(Self, LoadReport), DocumentError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(DocumentError::BadMagic);
        }
        let version = read_u16(reader)?;
        if version != VERSION {
            return Err(DocumentError::UnsupportedVersion(version));
        }

        let next_fresh = read_u64(reader)?;
        let queued = read_u32(reader)?;
        let mut recycled = Vec::new();
        for _ in 0..queued {
            recycled.push(ElementId(read_u64(reader)?));
        }

        factory.reset();
        let mut circuit = Self::new(factory, config);
        let mut report = LoadReport::default();
        let mut port_map: HashMap<u64, PortId> = HashMap::new();
        let mut live = Vec::new();

        let count = read_u32(reader)?;
        for _ in 0..count {
            let record = ElementRecord::read_from(reader)?;
            let id = ElementId(record.id);
            let inputs = record.inputs.len() as u32;
            let outputs = record.outputs.len() as u32;
            let element = ElementType::from_tag(record.tag)
                .filter(|_| circuit.element(id).is_none())
                .and_then(|ty| circuit.factory().rebuild(ty, id))
                .filter(|e| {
                    e.capabilities().accepts_inputs(inputs)
                        && e.capabilities().accepts_outputs(outputs)
                });
            let Some(mut element) = element else {
                log::warn!(
                    "Skipping element {id} with type tag {} and {inputs}/{outputs} ports",
                    record.tag
                );
                report.skipped_elements.push(id);
                continue;
            };

            element.pos = record.pos;
            element.rotation = record.rotation;
            element.label = record.label;
            element.color = record.color;
            element.audio = record.audio;
            element.skin = record.skin;
            element.trigger = record.trigger;
            element.frequency = record.frequency;

            let (inputs, outputs) = circuit.insert_element(element, inputs, outputs);
            for (stored, port) in record
                .inputs
                .iter()
                .zip(&inputs)
                .chain(record.outputs.iter().zip(&outputs))
            {
                port_map.insert(*stored, *port);
            }
            live.push(id);
        }

        // Skipped identities go back into circulation.
        let skipped: Vec<ElementId> = report
            .skipped_elements
            .iter()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();
        let allocator =
            IdentityAllocator::restore(next_fresh, recycled.into_iter().chain(skipped), live)
                .ok_or(DocumentError::IdentityOverflow)?;
        circuit.factory_mut().set_allocator(allocator);

        let count = read_u32(reader)?;
        for _ in 0..count {
            let conn = circuit.new_connection();
            let resolved = if port_map.is_empty() {
                // An empty map would fall back to resolving against live ports.
                ConnectionRecord::read_from(reader)?;
                false
            } else {
                circuit.deserialize_connection(conn, reader, &port_map)?
            };
            if !resolved {
                log::warn!("Dropping connection with unresolved ports");
                circuit.remove_connection(conn);
                report.dropped_connections += 1;
            }
        }

        // A later record plugged into the same input unplugs the earlier one.
        let unplugged: Vec<_> = circuit
            .connections()
            .filter(|(_, conn)| !conn.is_complete())
            .map(|(id, _)| id)
            .collect();
        for conn in unplugged {
            log::warn!("Dropping connection {conn}: its input is taken by another record");
            circuit.remove_connection(conn);
            report.dropped_connections += 1;
        }

        Ok((circuit, report))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), DocumentError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        log::info!("Saved circuit to: {}", path.display());
        Ok(())
    }

    pub fn load_from_path(
        path: &Path,
        factory: ElementFactory,
        config: WiringConfig,
    ) -> Result<(Self, LoadReport), DocumentError> {
        let mut reader = BufReader::new(File::open(path)?);
        let loaded = Self::load_with(factory, config, &mut reader)?;
        log::info!("Loaded circuit from: {}", path.display());
        Ok(loaded)
    }

    pub fn summary(&self) -> CircuitSummary {
        let elements = self
            .elements()
            .map(|e| ElementSummary {
                id: e.id(),
                kind: e.kind(),
                label: e.label.clone(),
                pos: e.pos,
                inputs: e.input_size(),
                outputs: e.output_size(),
            })
            .collect();
        let allocator = self.factory().allocator();
        CircuitSummary {
            elements,
            connections: self.connections().count(),
            next_fresh: allocator.next_fresh(),
            recycled: allocator.recycled().iter().copied().collect(),
        }
    }
}

/// JSON-friendly overview of a circuit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitSummary {
    pub elements: Vec<ElementSummary>,
    pub connections: usize,
    pub next_fresh: u64,
    pub recycled: Vec<ElementId>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ElementSummary {
    pub id: ElementId,
    pub kind: ElementType,
    pub label: String,
    pub pos: Pos2,
    pub inputs: u32,
    pub outputs: u32,
}

struct ElementRecord {
    id: u64,
    tag: u16,
    pos: Pos2,
    rotation: f32,
    label: String,
    color: String,
    audio: String,
    skin: Skin,
    trigger: Option<char>,
    frequency: f32,
    inputs: Vec<u64>,
    outputs: Vec<u64>,
}

impl ElementRecord {
    fn read_from(reader: &mut impl Read) -> Result<Self, DocumentError> {
        let id = read_u64(reader)?;
        let tag = read_u16(reader)?;
        let x = read_f32(reader)?;
        let y = read_f32(reader)?;
        let rotation = read_f32(reader)?;
        let label = read_str(reader)?;
        let color = read_str(reader)?;
        let audio = read_str(reader)?;
        let skin = match read_str(reader)? {
            path if path.is_empty() => Skin::Default,
            path => Skin::Custom(path),
        };
        let trigger = match read_u32(reader)? {
            0 => None,
            code => Some(char::from_u32(code).ok_or(DocumentError::InvalidTrigger(code))?),
        };
        let frequency = read_f32(reader)?;
        let inputs = read_port_ids(reader)?;
        let outputs = read_port_ids(reader)?;
        Ok(Self {
            id,
            tag,
            pos: pos2(x, y),
            rotation,
            label,
            color,
            audio,
            skin,
            trigger,
            frequency,
            inputs,
            outputs,
        })
    }
}

fn read_port_ids(reader: &mut impl Read) -> io::Result<Vec<u64>> {
    let count = read_u32(reader)?;
    (0..count).map(|_| read_u64(reader)).collect()
}

fn write_u16(writer: &mut impl Write, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

fn write_u32(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

fn write_u64(writer: &mut impl Write, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

fn write_f32(writer: &mut impl Write, value: f32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

fn write_len(writer: &mut impl Write, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    write_u32(writer, len)
}

fn write_str(writer: &mut impl Write, value: &str) -> io::Result<()> {
    write_len(writer, value.len())?;
    writer.write_all(value.as_bytes())
}

fn read_array<const N: usize>(reader: &mut impl Read) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u16(reader: &mut impl Read) -> io::Result<u16> {
    read_array(reader).map(u16::from_be_bytes)
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    read_array(reader).map(u32::from_be_bytes)
}

fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    read_array(reader).map(u64::from_be_bytes)
}

fn read_f32(reader: &mut impl Read) -> io::Result<f32> {
    read_array(reader).map(f32::from_be_bytes)
}

fn read_str(reader: &mut impl Read) -> Result<String, DocumentError> {
    let len = read_u32(reader)? as usize;
    let mut bytes = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(String::from_utf8(bytes)?)
}
