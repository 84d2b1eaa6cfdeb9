use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::io::{self, Read, Write};

use egui::{Pos2, Stroke, Vec2};
use slotmap::{Key as _, KeyData, SlotMap};

use crate::{
    assets::{self, PortKind},
    config::WiringConfig,
    connection::{Connection, ConnectionRecord, ConnectionStatus, line_angle},
    element::{Element, ElementId, ElementType},
    factory::ElementFactory,
};

slotmap::new_key_type! {
    pub struct PortId;
}

slotmap::new_key_type! {
    pub struct ConnectionId;
}

impl PortId {
    /// Identity written to documents. Never zero.
    pub fn persisted(self) -> u64 {
        self.data().as_ffi()
    }

    pub fn from_persisted(raw: u64) -> Option<Self> {
        (raw != 0).then(|| KeyData::from_ffi(raw).into())
    }
}

impl Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A port known to be an output. Only [`Circuit::output_port`] hands these out.
#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash)]
pub struct OutputPort(PortId);

/// A port known to be an input. Only [`Circuit::input_port`] hands these out.
#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash)]
pub struct InputPort(PortId);

impl OutputPort {
    pub fn id(self) -> PortId {
        self.0
    }
}

impl InputPort {
    pub fn id(self) -> PortId {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    kind: PortKind,
    element: ElementId,
    index: u32,
    offset: Vec2,
    scene_pos: Pos2,
    // Back-references. Inputs hold at most one.
    connections: Vec<ConnectionId>,
}

impl Port {
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn scene_pos(&self) -> Pos2 {
        self.scene_pos
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    fn connect(&mut self, id: ConnectionId) {
        if !self.connections.contains(&id) {
            self.connections.push(id);
        }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        self.connections.retain(|c| *c != id);
    }
}

/// An open document: elements, their ports and the wires between them.
#[derive(Debug)]
pub struct Circuit {
    factory: ElementFactory,
    config: WiringConfig,
    elements: BTreeMap<ElementId, Element>,
    ports: SlotMap<PortId, Port>,
    connections: SlotMap<ConnectionId, Connection>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new(ElementFactory::with_default_catalog(), WiringConfig::default())
    }
}

impl Circuit {
    pub fn new(factory: ElementFactory, config: WiringConfig) -> Self {
        Self {
            factory,
            config,
            elements: BTreeMap::new(),
            ports: SlotMap::with_key(),
            connections: SlotMap::with_key(),
        }
    }

    /// Empties the document and forgets every issued element identity.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.ports.clear();
        self.connections.clear();
        self.factory.reset();
    }

    pub fn factory(&self) -> &ElementFactory {
        &self.factory
    }

    pub(crate) fn factory_mut(&mut self) -> &mut ElementFactory {
        &mut self.factory
    }

    pub fn config(&self) -> &WiringConfig {
        &self.config
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn element_ids(&self) -> Vec<ElementId> {
        self.elements.keys().copied().collect()
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id)
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortId, &Port)> {
        self.ports.iter()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn connections(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.connections.iter()
    }

    pub fn output_port(&self, id: PortId) -> Option<OutputPort> {
        let port = self.ports.get(id)?;
        port.kind.is_output().then_some(OutputPort(id))
    }

    pub fn input_port(&self, id: PortId) -> Option<InputPort> {
        let port = self.ports.get(id)?;
        (!port.kind.is_output()).then_some(InputPort(id))
    }

    // Elements

    /// Builds an element of type `ty` centered at `pos` with its minimum port counts.
    /// Returns `None` for types the factory cannot build.
    pub fn add_element(&mut self, ty: ElementType, pos: Pos2) -> Option<ElementId> {
        let mut element = self.factory.construct(ty)?;
        element.pos = pos;
        let inputs = element.capabilities().min_inputs;
        let outputs = element.capabilities().min_outputs;
        let id = element.id();
        self.insert_element(element, inputs, outputs);
        Some(id)
    }

    /// Stores `element` and gives it fresh ports. Returns the new input and output ports.
    pub(crate) fn insert_element(
        &mut self,
        element: Element,
        inputs: u32,
        outputs: u32,
    ) -> (Vec<PortId>, Vec<PortId>) {
        let id = element.id();
        let pos = element.pos;
        self.elements.insert(id, element);

        let layout = assets::port_layout(
            inputs as usize,
            outputs as usize,
            self.config.base_element_size,
        );
        let mut input_ids = Vec::new();
        let mut output_ids = Vec::new();
        for graphics in layout {
            let side = match graphics.kind {
                PortKind::Input => &mut input_ids,
                PortKind::Output => &mut output_ids,
            };
            let port_id = self.ports.insert(Port {
                kind: graphics.kind,
                element: id,
                index: side.len() as u32,
                offset: graphics.offset,
                scene_pos: pos + graphics.offset,
                connections: Vec::new(),
            });
            side.push(port_id);
        }
        if let Some(element) = self.elements.get_mut(&id) {
            element.inputs.clone_from(&input_ids);
            element.outputs.clone_from(&output_ids);
        }
        (input_ids, output_ids)
    }

    /// Deletes an element, every wire attached to it and its ports, then recycles its id.
    pub fn remove_element(&mut self, id: ElementId) -> bool {
        let Some(element) = self.elements.remove(&id) else {
            return false;
        };
        for port in element.ports() {
            self.remove_port(port);
        }
        self.factory.release(id);
        log::debug!("Removed element {id}");
        true
    }

    fn remove_port(&mut self, port: PortId) {
        let attached = self
            .ports
            .get(port)
            .map(|p| p.connections.clone())
            .unwrap_or_default();
        for conn in attached {
            self.remove_connection(conn);
        }
        self.ports.remove(port);
    }

    /// Moves an element and drags the ends of its wires along.
    pub fn move_element(&mut self, id: ElementId, delta: Vec2) {
        let Some(element) = self.elements.get_mut(&id) else {
            return;
        };
        element.pos += delta;
        let pos = element.pos;
        let ports: Vec<PortId> = element.ports().collect();

        let mut touched = Vec::new();
        for port_id in ports {
            if let Some(port) = self.ports.get_mut(port_id) {
                port.scene_pos = pos + port.offset;
                touched.extend(port.connections.iter().copied());
            }
        }
        touched.sort_unstable();
        touched.dedup();
        for conn in touched {
            self.update_positions_from_ports(conn);
        }
    }

    /// Changes the number of inputs within the element's allowed range. Ports are laid out
    /// again; surviving inputs keep their wires, dropped inputs take their wires with them.
    pub fn set_input_size(&mut self, id: ElementId, size: u32) -> bool {
        let Some(element) = self.elements.get(&id) else {
            return false;
        };
        if !element.capabilities().accepts_inputs(size) {
            return false;
        }
        let current = element.inputs.clone();
        let outputs = element.outputs.clone();
        let pos = element.pos;
        if current.len() == size as usize {
            return true;
        }

        for dropped in current.iter().skip(size as usize) {
            self.remove_port(*dropped);
        }
        let mut inputs: Vec<PortId> = current.into_iter().take(size as usize).collect();
        while inputs.len() < size as usize {
            let port = self.ports.insert(Port {
                kind: PortKind::Input,
                element: id,
                index: inputs.len() as u32,
                offset: Vec2::ZERO,
                scene_pos: pos,
                connections: Vec::new(),
            });
            inputs.push(port);
        }

        let layout = assets::port_layout(
            inputs.len(),
            outputs.len(),
            self.config.base_element_size,
        );
        let mut touched = Vec::new();
        for (port_id, graphics) in inputs.iter().chain(outputs.iter()).zip(layout) {
            if let Some(port) = self.ports.get_mut(*port_id) {
                port.offset = graphics.offset;
                port.scene_pos = pos + graphics.offset;
                touched.extend(port.connections.iter().copied());
            }
        }
        for conn in touched {
            self.update_positions_from_ports(conn);
        }
        if let Some(element) = self.elements.get_mut(&id) {
            element.inputs = inputs;
        }
        true
    }

    /// Turns an element into another registered type of a compatible group that accepts its
    /// current port counts. Identity, position, label and wires are kept.
    pub fn morph(&mut self, id: ElementId, ty: ElementType) -> bool {
        let Some(element) = self.elements.get(&id) else {
            return false;
        };
        let Some(template) = self.factory.rebuild(ty, id) else {
            return false;
        };
        let caps = template.capabilities();
        if !element.group().is_compatible(template.group())
            || !caps.accepts_inputs(element.input_size())
            || !caps.accepts_outputs(element.output_size())
        {
            return false;
        }
        if let Some(element) = self.elements.get_mut(&id) {
            element.morph_into(&template);
        }
        true
    }

    // Connections

    pub fn new_connection(&mut self) -> ConnectionId {
        self.connections.insert(Connection::new())
    }

    pub fn connect(&mut self, output: OutputPort, input: InputPort) -> ConnectionId {
        let id = self.new_connection();
        self.set_start(id, Some(output));
        self.set_end(id, Some(input));
        self.update_positions_from_ports(id);
        id
    }

    /// Detaches the wire from both ports and deletes it.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        if !self.connections.contains_key(id) {
            return false;
        }
        self.set_start(id, None);
        self.set_end(id, None);
        self.connections.remove(id);
        true
    }

    /// Points the wire's start at `port`, detaching from the previous output first.
    pub fn set_start(&mut self, id: ConnectionId, port: Option<OutputPort>) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut conn.start, port);
        if let Some(old) = old
            && Some(old) != port
            && let Some(old_port) = self.ports.get_mut(old.0)
        {
            old_port.disconnect(id);
        }
        let Some(new) = port else {
            return;
        };
        match self.ports.get_mut(new.0) {
            Some(new_port) => {
                new_port.connect(id);
                conn.set_start_pos(new_port.scene_pos);
            }
            None => conn.start = None,
        }
    }

    /// Points the wire's end at `port`, detaching from the previous input first. A wire
    /// already plugged into `port` loses its end.
    pub fn set_end(&mut self, id: ConnectionId, port: Option<InputPort>) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut conn.end, port);
        if let Some(old) = old
            && Some(old) != port
            && let Some(old_port) = self.ports.get_mut(old.0)
        {
            old_port.disconnect(id);
        }
        let Some(new) = port else {
            return;
        };

        let occupants: Vec<ConnectionId> = self
            .ports
            .get(new.0)
            .map(|p| p.connections.iter().copied().filter(|c| *c != id).collect())
            .unwrap_or_default();
        for other in occupants {
            log::debug!("Input {} already wired by {other}, unplugging it", new.0);
            self.set_end(other, None);
        }

        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        match self.ports.get_mut(new.0) {
            Some(new_port) => {
                new_port.connect(id);
                conn.set_end_pos(new_port.scene_pos);
            }
            None => conn.end = None,
        }
    }

    /// Refreshes cached end positions from the attached ports and rebuilds the path.
    pub fn update_positions_from_ports(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        if let Some(port) = conn.start.and_then(|p| self.ports.get(p.0)) {
            conn.set_start_pos(port.scene_pos);
        }
        if let Some(port) = conn.end.and_then(|p| self.ports.get(p.0)) {
            conn.set_end_pos(port.scene_pos);
        }
        conn.compute_path();
    }

    pub fn set_status(&mut self, id: ConnectionId, status: ConnectionStatus) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.set_status(status);
        }
    }

    pub fn connection_stroke(&self, id: ConnectionId, selected: bool) -> Option<Stroke> {
        let conn = self.connections.get(id)?;
        Some(self.config.stroke_for(conn.status(), selected))
    }

    /// Angle in degrees from the output end to the input end, 0 when either end is missing.
    pub fn connection_angle(&self, id: ConnectionId) -> f32 {
        let Some(conn) = self.connections.get(id) else {
            return 0.0;
        };
        let start = conn.start.and_then(|p| self.ports.get(p.0));
        let end = conn.end.and_then(|p| self.ports.get(p.0));
        let (Some(mut from), Some(mut to)) = (start, end) else {
            return 0.0;
        };
        if to.kind.is_output() {
            std::mem::swap(&mut from, &mut to);
        }
        line_angle(from.scene_pos, to.scene_pos)
    }

    pub fn other_port(&self, id: ConnectionId, port: PortId) -> Option<PortId> {
        self.connections.get(id)?.other_port(port)
    }

    // Persistence of single connections

    pub fn serialize_connection(
        &self,
        id: ConnectionId,
        writer: &mut impl Write,
    ) -> io::Result<()> {
        match self.connections.get(id) {
            Some(conn) => conn.serialize(writer),
            None => Connection::new().serialize(writer),
        }
    }

    /// Reads one connection record into `id`.
    ///
    /// With a non-empty `port_map` both stored identities must be keys of the map. With an
    /// empty map they are taken as ports of this circuit, which only works while those ports
    /// are still alive. The stored order does not matter: the output becomes the start. On
    /// any mismatch both ends are left unset and `false` is returned. Errors are reserved for
    /// the reader itself failing.
    pub fn deserialize_connection(
        &mut self,
        id: ConnectionId,
        reader: &mut impl Read,
        port_map: &HashMap<u64, PortId>,
    ) -> io::Result<bool> {
        let record = ConnectionRecord::read_from(reader)?;
        if !self.connections.contains_key(id) {
            return Ok(false);
        }

        let resolved = if port_map.is_empty() {
            (self.live_port(record.first), self.live_port(record.second))
        } else {
            (
                port_map.get(&record.first).copied(),
                port_map.get(&record.second).copied(),
            )
        };
        let oriented = match resolved {
            (Some(a), Some(b)) => self.orient(a, b),
            _ => None,
        };

        match oriented {
            Some((output, input)) => {
                self.set_start(id, Some(output));
                self.set_end(id, Some(input));
            }
            None => {
                log::debug!(
                    "Connection record {:#x} -> {:#x} does not resolve to an output and an input",
                    record.first,
                    record.second
                );
                self.set_start(id, None);
                self.set_end(id, None);
            }
        }
        self.update_positions_from_ports(id);
        Ok(self.connections.get(id).is_some_and(Connection::is_complete))
    }

    fn live_port(&self, raw: u64) -> Option<PortId> {
        PortId::from_persisted(raw).filter(|p| self.ports.contains_key(*p))
    }

    fn orient(&self, a: PortId, b: PortId) -> Option<(OutputPort, InputPort)> {
        if let (Some(output), Some(input)) = (self.output_port(a), self.input_port(b)) {
            return Some((output, input));
        }
        if let (Some(output), Some(input)) = (self.output_port(b), self.input_port(a)) {
            return Some((output, input));
        }
        None
    }

    /// Bytes that [`Self::restore_connection`] can bring back while the ports are alive.
    pub fn snapshot_connection(&self, id: ConnectionId) -> Option<Vec<u8>> {
        let conn = self.connections.get(id)?;
        let mut buf = Vec::with_capacity(crate::connection::RECORD_LEN);
        conn.serialize(&mut buf).ok()?;
        Some(buf)
    }

    pub fn restore_connection(&mut self, mut snapshot: &[u8]) -> Option<ConnectionId> {
        let id = self.new_connection();
        match self.deserialize_connection(id, &mut snapshot, &HashMap::new()) {
            Ok(true) => Some(id),
            Ok(false) | Err(_) => {
                self.remove_connection(id);
                None
            }
        }
    }

    // Debug output

    pub fn display(&self) -> String {
        let mut out = String::new();
        use std::fmt::Write as _;

        writeln!(out, "======================================").ok();
        writeln!(out, "  ELEMENTS ({} total)", self.elements.len()).ok();
        writeln!(out, "======================================").ok();

        let count = self.elements.len();
        for (idx, element) in self.elements.values().enumerate() {
            let is_last = idx == count - 1;
            let branch = if is_last { "`-" } else { "|-" };
            let cont = if is_last { "   " } else { "|  " };

            let label = if element.label.is_empty() {
                String::new()
            } else {
                format!(" \"{}\"", element.label)
            };
            writeln!(out, "{branch} {:?} [{}]{label}", element.kind(), element.id()).ok();

            let ports: Vec<PortId> = element.ports().collect();
            for (port_idx, port_id) in ports.iter().enumerate() {
                let Some(port) = self.ports.get(*port_id) else {
                    continue;
                };
                let port_branch = if port_idx == ports.len() - 1 { "`-" } else { "|-" };
                let (kind_str, arrow) = match port.kind {
                    PortKind::Input => ("In", "<-"),
                    PortKind::Output => ("Out", "->"),
                };
                let others: Vec<String> = port
                    .connections
                    .iter()
                    .filter_map(|c| self.other_port(*c, *port_id))
                    .map(|p| self.port_short(p))
                    .collect();
                let conn_str = if others.is_empty() {
                    "(unconnected)".to_owned()
                } else {
                    others.join(", ")
                };
                writeln!(
                    out,
                    "{cont}{port_branch} #{} ({kind_str})  {arrow} {conn_str}",
                    port.index
                )
                .ok();
            }
        }

        writeln!(out).ok();
        writeln!(out, "======================================").ok();
        writeln!(out, "  CONNECTIONS ({} total)", self.connections.len()).ok();
        writeln!(out, "======================================").ok();
        for (id, conn) in &self.connections {
            let start = conn
                .start
                .map_or_else(|| "(none)".to_owned(), |p| self.port_short(p.0));
            let end = conn
                .end
                .map_or_else(|| "(none)".to_owned(), |p| self.port_short(p.0));
            writeln!(out, "{id}: {start} -> {end} {:?}", conn.status()).ok();
        }

        out
    }

    /// Short display for a port: "And[3]#0"
    fn port_short(&self, id: PortId) -> String {
        let Some(port) = self.ports.get(id) else {
            return "?".to_owned();
        };
        let kind = self
            .elements
            .get(&port.element)
            .map_or_else(|| "?".to_owned(), |e| format!("{:?}", e.kind()));
        format!("{kind}[{}]#{}", port.element, port.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{pos2, vec2};
    use rstest::rstest;

    struct Wiring {
        circuit: Circuit,
        source: ElementId,
        sink: ElementId,
        output: OutputPort,
        input: InputPort,
    }

    fn switch_and_led() -> Wiring {
        let mut circuit = Circuit::default();
        let source = circuit
            .add_element(ElementType::Switch, pos2(0.0, 0.0))
            .expect("Switch is registered");
        let sink = circuit
            .add_element(ElementType::Led, pos2(200.0, 100.0))
            .expect("Led is registered");
        let output = circuit
            .output_port(circuit.element(source).expect("source exists").outputs()[0])
            .expect("switch port is an output");
        let input = circuit
            .input_port(circuit.element(sink).expect("sink exists").inputs()[0])
            .expect("led port is an input");
        Wiring {
            circuit,
            source,
            sink,
            output,
            input,
        }
    }

    fn back_refs(circuit: &Circuit, port: PortId, conn: ConnectionId) -> usize {
        circuit
            .port(port)
            .expect("port exists")
            .connections()
            .iter()
            .filter(|c| **c == conn)
            .count()
    }

    #[rstest]
    #[case::start_first(true)]
    #[case::end_first(false)]
    fn wiring_order_does_not_matter(#[case] start_first: bool) {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.new_connection();
        if start_first {
            circuit.set_start(conn, Some(output));
            circuit.set_end(conn, Some(input));
        } else {
            circuit.set_end(conn, Some(input));
            circuit.set_start(conn, Some(output));
        }

        let c = circuit.connection(conn).expect("connection exists");
        let start = c.start().expect("start is set");
        let end = c.end().expect("end is set");
        assert_eq!(
            circuit.port(start.id()).map(Port::kind),
            Some(PortKind::Output)
        );
        assert_eq!(circuit.port(end.id()).map(Port::kind), Some(PortKind::Input));
        assert_eq!(back_refs(&circuit, output.id(), conn), 1);
        assert_eq!(back_refs(&circuit, input.id(), conn), 1);
    }

    #[test]
    fn typed_handles_reject_the_wrong_kind() {
        let Wiring {
            circuit,
            output,
            input,
            ..
        } = switch_and_led();
        assert!(circuit.input_port(output.id()).is_none());
        assert!(circuit.output_port(input.id()).is_none());
    }

    #[test]
    fn clearing_the_start_only_touches_the_output() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        circuit.set_start(conn, None);

        let c = circuit.connection(conn).expect("connection exists");
        assert!(c.start().is_none());
        assert_eq!(c.end(), Some(input));
        assert_eq!(back_refs(&circuit, output.id(), conn), 0);
        assert_eq!(back_refs(&circuit, input.id(), conn), 1);
    }

    #[test]
    fn setting_the_same_start_twice_keeps_one_back_reference() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        circuit.set_start(conn, Some(output));
        assert_eq!(back_refs(&circuit, output.id(), conn), 1);
    }

    #[test]
    fn outputs_fan_out_but_inputs_take_one_wire() {
        let Wiring {
            mut circuit,
            source,
            output,
            input,
            ..
        } = switch_and_led();
        let second_led = circuit
            .add_element(ElementType::Led, pos2(200.0, -100.0))
            .expect("Led is registered");
        let second_input = circuit
            .input_port(circuit.element(second_led).expect("led exists").inputs()[0])
            .expect("input");
        let first = circuit.connect(output, input);
        let second = circuit.connect(output, second_input);
        assert_eq!(
            circuit.port(output.id()).map(|p| p.connections().len()),
            Some(2)
        );

        let other_switch = circuit
            .add_element(ElementType::Switch, pos2(0.0, 300.0))
            .expect("Switch is registered");
        let other_output = circuit
            .output_port(circuit.element(other_switch).expect("switch exists").outputs()[0])
            .expect("output");
        let third = circuit.connect(other_output, input);

        assert_eq!(
            circuit.port(input.id()).map(|p| p.connections().to_vec()),
            Some(vec![third])
        );
        assert!(circuit.connection(first).expect("still exists").end().is_none());
        assert!(circuit.connection(second).expect("exists").is_complete());
        assert_eq!(circuit.element(source).map(Element::output_size), Some(1));
    }

    #[test]
    fn removing_a_connection_detaches_both_ends() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        assert!(circuit.remove_connection(conn));
        assert!(!circuit.remove_connection(conn));
        assert_eq!(back_refs(&circuit, output.id(), conn), 0);
        assert_eq!(back_refs(&circuit, input.id(), conn), 0);
    }

    #[test]
    fn removing_an_element_cascades_and_recycles_its_id() {
        let Wiring {
            mut circuit,
            source,
            sink,
            output,
            input,
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        assert!(circuit.remove_element(sink));

        assert!(circuit.connection(conn).is_none());
        assert!(circuit.port(input.id()).is_none());
        assert_eq!(back_refs(&circuit, output.id(), conn), 0);
        assert_eq!(
            circuit.factory().allocator().recycled().front(),
            Some(&sink)
        );

        let reused = circuit
            .add_element(ElementType::Not, pos2(50.0, 50.0))
            .expect("Not is registered");
        assert_eq!(reused, sink);
        assert_ne!(reused, source);
        assert!(!circuit.remove_element(ElementId(99)));
    }

    #[test]
    fn moving_an_element_drags_its_wires() {
        let Wiring {
            mut circuit,
            source,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        let before = circuit.connection(conn).expect("exists").start_pos();

        circuit.move_element(source, vec2(10.0, -5.0));

        let c = circuit.connection(conn).expect("exists");
        assert_eq!(c.start_pos(), before + vec2(10.0, -5.0));
        assert_eq!(c.path().start, c.start_pos());
        assert_eq!(
            circuit.port(output.id()).map(Port::scene_pos),
            Some(c.start_pos())
        );
    }

    // The switch's output sits 32 right of its center and the led's input 32 left of its
    // center, so these led positions put the input right of, left of, above and below the
    // output.
    #[rstest]
    #[case::input_to_the_right(pos2(200.0, 0.0), 0.0)]
    #[case::input_above(pos2(64.0, -200.0), 90.0)]
    #[case::input_to_the_left(pos2(-200.0, 0.0), 180.0)]
    #[case::input_below(pos2(64.0, 200.0), 270.0)]
    fn angle_runs_from_output_to_input(#[case] led_at: Pos2, #[case] expected: f32) {
        let mut circuit = Circuit::default();
        let switch = circuit
            .add_element(ElementType::Switch, pos2(0.0, 0.0))
            .expect("Switch is registered");
        let led = circuit
            .add_element(ElementType::Led, led_at)
            .expect("Led is registered");
        let output = circuit
            .output_port(circuit.element(switch).expect("exists").outputs()[0])
            .expect("output");
        let input = circuit
            .input_port(circuit.element(led).expect("exists").inputs()[0])
            .expect("input");
        let conn = circuit.connect(output, input);
        let angle = circuit.connection_angle(conn);
        assert!(
            (angle - expected).abs() < 1e-3,
            "expected {expected} degrees, got {angle}"
        );

        circuit.set_end(conn, None);
        assert_eq!(circuit.connection_angle(conn), 0.0);
    }

    #[test]
    fn other_port_compares_identity() {
        let Wiring {
            mut circuit,
            source,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        assert_eq!(circuit.other_port(conn, output.id()), Some(input.id()));
        assert_eq!(circuit.other_port(conn, input.id()), Some(output.id()));

        let unrelated = circuit
            .add_element(ElementType::And, pos2(0.0, 0.0))
            .expect("And is registered");
        let stranger = circuit.element(unrelated).expect("exists").inputs()[0];
        assert_eq!(circuit.other_port(conn, stranger), None);

        // The unchecked variants trust the caller.
        let c = circuit.connection(conn).expect("exists");
        let stranger_input = circuit.input_port(stranger).expect("input");
        assert_eq!(c.other_port_of_input_unchecked(stranger_input), Some(output));
        assert_eq!(c.other_port_of_output_unchecked(output), Some(input));
        assert!(circuit.element(source).is_some());
    }

    fn port_map(circuit: &Circuit, ports: &[PortId]) -> HashMap<u64, PortId> {
        ports
            .iter()
            .map(|p| (p.persisted(), *p))
            .filter(|(_, p)| circuit.port(*p).is_some())
            .collect()
    }

    #[test]
    fn serialized_connection_comes_back_through_a_port_map() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let original = circuit.connect(output, input);
        let mut buf = Vec::new();
        circuit
            .serialize_connection(original, &mut buf)
            .expect("writing to a Vec cannot fail");
        assert_eq!(buf.len(), crate::connection::RECORD_LEN);

        let map = port_map(&circuit, &[output.id(), input.id()]);
        let copy = circuit.new_connection();
        let ok = circuit
            .deserialize_connection(copy, &mut buf.as_slice(), &map)
            .expect("complete record");
        assert!(ok);
        let c = circuit.connection(copy).expect("exists");
        assert_eq!(c.start(), Some(output));
        assert_eq!(c.end(), Some(input));
        assert_eq!(c.path().end, c.end_pos());
    }

    #[test]
    fn stored_order_does_not_decide_orientation() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let mut buf = Vec::new();
        ConnectionRecord {
            first: input.id().persisted(),
            second: output.id().persisted(),
        }
        .write_to(&mut buf)
        .expect("writing to a Vec cannot fail");

        let map = port_map(&circuit, &[output.id(), input.id()]);
        let conn = circuit.new_connection();
        assert!(
            circuit
                .deserialize_connection(conn, &mut buf.as_slice(), &map)
                .expect("complete record")
        );
        let c = circuit.connection(conn).expect("exists");
        assert_eq!(c.start(), Some(output));
        assert_eq!(c.end(), Some(input));
    }

    #[test]
    fn missing_identity_in_the_map_fails_and_leaves_both_ends_unset() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let original = circuit.connect(output, input);
        let mut buf = Vec::new();
        circuit
            .serialize_connection(original, &mut buf)
            .expect("writing to a Vec cannot fail");

        let map = port_map(&circuit, &[output.id()]);
        let conn = circuit.new_connection();
        let ok = circuit
            .deserialize_connection(conn, &mut buf.as_slice(), &map)
            .expect("complete record");
        assert!(!ok);
        let c = circuit.connection(conn).expect("exists");
        assert!(c.start().is_none());
        assert!(c.end().is_none());
        assert_eq!(back_refs(&circuit, output.id(), conn), 0);
    }

    #[test]
    fn same_kind_pair_fails_and_leaves_both_ends_unset() {
        let mut circuit = Circuit::default();
        let gate = circuit
            .add_element(ElementType::And, pos2(0.0, 0.0))
            .expect("And is registered");
        let inputs = circuit.element(gate).expect("exists").inputs().to_vec();
        let mut buf = Vec::new();
        ConnectionRecord {
            first: inputs[0].persisted(),
            second: inputs[1].persisted(),
        }
        .write_to(&mut buf)
        .expect("writing to a Vec cannot fail");

        let map = port_map(&circuit, &inputs);
        let conn = circuit.new_connection();
        let ok = circuit
            .deserialize_connection(conn, &mut buf.as_slice(), &map)
            .expect("complete record");
        assert!(!ok);
        let c = circuit.connection(conn).expect("exists");
        assert!(c.start().is_none() && c.end().is_none());
        assert!(inputs
            .iter()
            .all(|p| circuit.port(*p).is_some_and(|p| !p.is_connected())));
    }

    #[test]
    fn failed_load_clears_ends_that_were_set_before() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        let garbage = [0xffu8; 16];
        let map = port_map(&circuit, &[output.id(), input.id()]);
        let ok = circuit
            .deserialize_connection(conn, &mut garbage.as_slice(), &map)
            .expect("complete record");
        assert!(!ok);
        assert!(!circuit.connection(conn).expect("exists").is_complete());
        assert_eq!(back_refs(&circuit, output.id(), conn), 0);
        assert_eq!(back_refs(&circuit, input.id(), conn), 0);
    }

    #[test]
    fn snapshot_restores_while_ports_live() {
        let Wiring {
            mut circuit,
            sink,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        let snapshot = circuit.snapshot_connection(conn).expect("connection exists");
        circuit.remove_connection(conn);

        let restored = circuit
            .restore_connection(&snapshot)
            .expect("ports are still alive");
        let c = circuit.connection(restored).expect("exists");
        assert_eq!(c.start(), Some(output));
        assert_eq!(c.end(), Some(input));

        circuit.remove_element(sink);
        assert!(circuit.restore_connection(&snapshot).is_none());
        assert_eq!(circuit.connections().count(), 0);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut circuit = Circuit::default();
        let conn = circuit.new_connection();
        let short = [0u8; 8];
        assert!(
            circuit
                .deserialize_connection(conn, &mut short.as_slice(), &HashMap::new())
                .is_err()
        );
    }

    #[test]
    fn input_size_changes_drop_wires_on_removed_ports() {
        let mut circuit = Circuit::default();
        let gate = circuit
            .add_element(ElementType::Or, pos2(0.0, 0.0))
            .expect("Or is registered");
        let source = circuit
            .add_element(ElementType::Vcc, pos2(-200.0, 0.0))
            .expect("Vcc is registered");
        let output = circuit
            .output_port(circuit.element(source).expect("exists").outputs()[0])
            .expect("output");

        assert!(circuit.set_input_size(gate, 3));
        let inputs = circuit.element(gate).expect("exists").inputs().to_vec();
        assert_eq!(inputs.len(), 3);
        let third = circuit.input_port(inputs[2]).expect("input");
        let first = circuit.input_port(inputs[0]).expect("input");
        let kept = circuit.connect(output, first);
        let dropped = circuit.connect(output, third);

        assert!(circuit.set_input_size(gate, 2));
        assert!(circuit.connection(kept).is_some());
        assert!(circuit.connection(dropped).is_none());
        assert!(circuit.port(inputs[2]).is_none());
        assert!(!circuit.set_input_size(gate, 9));
        assert!(!circuit.set_input_size(gate, 1));
    }

    #[test]
    fn morph_keeps_identity_and_wires() {
        let Wiring {
            mut circuit,
            source,
            output,
            input,
            ..
        } = switch_and_led();
        let conn = circuit.connect(output, input);
        assert!(circuit.morph(source, ElementType::Clock));
        assert!(circuit.morph(source, ElementType::Vcc));
        let element = circuit.element(source).expect("exists");
        assert_eq!(element.kind(), ElementType::Vcc);
        assert_eq!(element.id(), source);
        assert!(circuit.connection(conn).expect("exists").is_complete());

        assert!(!circuit.morph(source, ElementType::And));
        assert!(!circuit.morph(source, ElementType::Display));
    }

    #[test]
    fn clear_resets_identities() {
        let Wiring { mut circuit, .. } = switch_and_led();
        circuit.clear();
        assert_eq!(circuit.elements().count(), 0);
        assert_eq!(
            circuit.add_element(ElementType::And, Pos2::ZERO),
            Some(ElementId(0))
        );
    }

    #[test]
    fn display_lists_wires_from_both_sides() {
        let Wiring {
            mut circuit,
            output,
            input,
            ..
        } = switch_and_led();
        circuit.connect(output, input);
        let text = circuit.display();
        assert!(text.contains("ELEMENTS (2 total)"));
        assert!(text.contains("Switch[0]#0 -> Led[1]#0"));
        assert!(text.contains("-> Led[1]#0"));
        assert!(text.contains("<- Switch[0]#0"));
    }
}
