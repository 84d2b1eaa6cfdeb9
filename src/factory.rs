use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::element::{Capabilities, Element, ElementGroup, ElementId, ElementType};

/// Issues element identities, reusing freed ones in the order they were freed before minting
/// new ones. `u64::MAX` is never minted, so a counter sitting there means the id space is
/// exhausted.
#[derive(Debug, Default, Clone)]
pub struct IdentityAllocator {
    next_fresh: u64,
    recycled: VecDeque<ElementId>,
    live: BTreeSet<ElementId>,
}

impl IdentityAllocator {
    /// `None` once the id space is exhausted and nothing is queued for reuse.
    pub fn allocate(&mut self) -> Option<ElementId> {
        let id = match self.recycled.pop_front() {
            Some(id) => id,
            None => {
                let id = ElementId(self.next_fresh);
                self.next_fresh = self.next_fresh.checked_add(1)?;
                id
            }
        };
        self.live.insert(id);
        Some(id)
    }

    /// Queues `id` for reuse. Ids that are not currently live (double release, or never issued)
    /// are rejected so the recycle queue cannot hand the same id out twice.
    pub fn release(&mut self, id: ElementId) -> bool {
        if !self.live.remove(&id) {
            log::warn!("Refusing to release element id {id}: it is not live");
            return false;
        }
        self.recycled.push_back(id);
        true
    }

    pub fn is_live(&self, id: ElementId) -> bool {
        self.live.contains(&id)
    }

    pub fn next_fresh(&self) -> u64 {
        self.next_fresh
    }

    pub fn recycled(&self) -> &VecDeque<ElementId> {
        &self.recycled
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Rebuilds the allocator from persisted state. Live ids win over queued ones, and the
    /// counter is bumped past every id seen so fresh ids never collide. `None` if an id is
    /// `u64::MAX`, which no allocator can have issued.
    pub fn restore(
        next_fresh: u64,
        recycled: impl IntoIterator<Item = ElementId>,
        live: impl IntoIterator<Item = ElementId>,
    ) -> Option<Self> {
        let live: BTreeSet<ElementId> = live.into_iter().collect();
        let mut queued = BTreeSet::new();
        let mut restored = VecDeque::new();
        for id in recycled {
            if live.contains(&id) || !queued.insert(id) {
                log::warn!("Dropping element id {id} from the recycle queue: already in use");
                continue;
            }
            restored.push_back(id);
        }
        let mut highest = 0;
        for id in live.iter().chain(restored.iter()) {
            highest = highest.max(id.0.checked_add(1)?);
        }
        Some(Self {
            next_fresh: next_fresh.max(highest),
            recycled: restored,
            live,
        })
    }
}

type Constructor = Box<dyn Fn() -> Element>;

/// Builds elements by type from an explicit registry and hands out their identities.
#[derive(Default)]
pub struct ElementFactory {
    allocator: IdentityAllocator,
    registry: HashMap<ElementType, Constructor>,
}

impl std::fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementFactory")
            .field("allocator", &self.allocator)
            .field("registered", &self.registry.len())
            .finish()
    }
}

impl ElementFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_catalog() -> Self {
        let mut factory = Self::new();
        register_default_catalog(&mut factory);
        factory
    }

    pub fn register(&mut self, ty: ElementType, constructor: impl Fn() -> Element + 'static) {
        self.registry.insert(ty, Box::new(constructor));
    }

    pub fn is_registered(&self, ty: ElementType) -> bool {
        self.registry.contains_key(&ty)
    }

    /// Builds a new element of type `ty`. Unregistered types yield `None` and consume no
    /// identity. Also `None` when no identity is left to hand out.
    pub fn construct(&mut self, ty: ElementType) -> Option<Element> {
        let constructor = self.registry.get(&ty)?;
        let Some(id) = self.allocator.allocate() else {
            log::warn!("Cannot build {ty:?}: element ids are exhausted");
            return None;
        };
        let mut element = constructor();
        element.set_id(id);
        log::debug!("Building element {} ({ty:?})", element.id());
        Some(element)
    }

    /// Builds an element carrying a previously persisted identity. The allocator is not
    /// consulted; callers restore it separately.
    pub fn rebuild(&self, ty: ElementType, id: ElementId) -> Option<Element> {
        let constructor = self.registry.get(&ty)?;
        let mut element = constructor();
        element.set_id(id);
        Some(element)
    }

    pub fn release(&mut self, id: ElementId) -> bool {
        self.allocator.release(id)
    }

    pub fn allocator(&self) -> &IdentityAllocator {
        &self.allocator
    }

    pub(crate) fn set_allocator(&mut self, allocator: IdentityAllocator) {
        self.allocator = allocator;
    }

    /// Forgets every issued identity, for a new document.
    pub fn reset(&mut self) {
        self.allocator = IdentityAllocator::default();
    }
}

fn register_default_catalog(factory: &mut ElementFactory) {
    let gate = Capabilities::ports((2, 8), (1, 1)).with_label().with_skin();
    for ty in [
        ElementType::And,
        ElementType::Or,
        ElementType::Nand,
        ElementType::Nor,
        ElementType::Xor,
        ElementType::Xnor,
    ] {
        factory.register(ty, move || Element::new(ty, ElementGroup::Gate, gate));
    }
    let single = Capabilities::ports((1, 1), (1, 1)).with_label().with_skin();
    for ty in [ElementType::Not, ElementType::Node] {
        factory.register(ty, move || Element::new(ty, ElementGroup::Gate, single));
    }

    let source = Capabilities::ports((0, 0), (1, 1)).with_label().with_skin();
    for ty in [ElementType::Button, ElementType::Switch] {
        let caps = source.with_trigger();
        factory.register(ty, move || Element::new(ty, ElementGroup::Input, caps));
    }
    factory.register(ElementType::Clock, move || {
        Element::new(
            ElementType::Clock,
            ElementGroup::Input,
            source.with_frequency(),
        )
    });
    let constant = Capabilities::ports((0, 0), (1, 1));
    for ty in [ElementType::Vcc, ElementType::Gnd] {
        factory.register(ty, move || Element::new(ty, ElementGroup::StaticInput, constant));
    }

    factory.register(ElementType::Led, || {
        let caps = Capabilities::ports((1, 1), (0, 0))
            .with_label()
            .with_color()
            .with_skin();
        Element::new(ElementType::Led, ElementGroup::Output, caps)
    });
    factory.register(ElementType::Buzzer, || {
        let caps = Capabilities::ports((1, 1), (0, 0))
            .with_label()
            .with_audio()
            .with_skin();
        Element::new(ElementType::Buzzer, ElementGroup::Output, caps)
    });

    let latch = Capabilities::ports((2, 2), (2, 2)).with_label().with_skin();
    for ty in [ElementType::DLatch, ElementType::JkLatch, ElementType::SrLatch] {
        factory.register(ty, move || Element::new(ty, ElementGroup::Memory, latch));
    }
    let flip_flop = Capabilities::ports((4, 4), (2, 2)).with_label().with_skin();
    for ty in [ElementType::DFlipFlop, ElementType::TFlipFlop] {
        factory.register(ty, move || Element::new(ty, ElementGroup::Memory, flip_flop));
    }
    let wide_flip_flop = Capabilities::ports((5, 5), (2, 2)).with_label().with_skin();
    for ty in [ElementType::JkFlipFlop, ElementType::SrFlipFlop] {
        factory.register(ty, move || {
            Element::new(ty, ElementGroup::Memory, wide_flip_flop)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_count_up_from_zero() {
        let mut ids = IdentityAllocator::default();
        assert_eq!(ids.allocate(), Some(ElementId(0)));
        assert_eq!(ids.allocate(), Some(ElementId(1)));
        assert_eq!(ids.allocate(), Some(ElementId(2)));
        assert_eq!(ids.next_fresh(), 3);
    }

    #[test]
    fn released_ids_come_back_in_release_order() {
        let mut ids = IdentityAllocator::default();
        for _ in 0..3 {
            ids.allocate();
        }
        assert!(ids.release(ElementId(1)));
        assert!(ids.release(ElementId(0)));
        assert_eq!(ids.allocate(), Some(ElementId(1)));
        assert_eq!(ids.allocate(), Some(ElementId(0)));
        assert_eq!(ids.allocate(), Some(ElementId(3)));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut ids = IdentityAllocator::default();
        let id = ids.allocate().expect("fresh allocator has ids");
        assert!(ids.release(id));
        assert!(!ids.release(id));
        assert_eq!(ids.recycled().len(), 1);

        assert_eq!(ids.allocate(), Some(id));
        assert_ne!(ids.allocate(), Some(id));
    }

    #[test]
    fn releasing_a_never_issued_id_is_rejected() {
        let mut ids = IdentityAllocator::default();
        assert!(!ids.release(ElementId(42)));
        assert!(ids.recycled().is_empty());
        assert_eq!(ids.allocate(), Some(ElementId(0)));
    }

    #[test]
    fn restore_drops_queued_ids_that_are_live() {
        let ids = IdentityAllocator::restore(
            2,
            [ElementId(1), ElementId(4), ElementId(1)],
            [ElementId(0), ElementId(4)],
        )
        .expect("ids are in range");
        assert_eq!(ids.recycled().iter().copied().collect::<Vec<_>>(), vec![
            ElementId(1)
        ]);
        assert_eq!(ids.next_fresh(), 5);
        assert!(ids.is_live(ElementId(4)));
    }

    #[test]
    fn restore_rejects_ids_no_allocator_can_issue() {
        assert!(IdentityAllocator::restore(0, [], [ElementId(u64::MAX)]).is_none());
        assert!(IdentityAllocator::restore(0, [ElementId(u64::MAX)], []).is_none());
        let last = IdentityAllocator::restore(0, [], [ElementId(u64::MAX - 1)])
            .expect("largest issuable id");
        assert_eq!(last.next_fresh(), u64::MAX);
    }

    #[test]
    fn exhausted_ids_stop_construction_without_panicking() {
        let mut ids = IdentityAllocator::restore(u64::MAX - 1, [], []).expect("in range");
        assert_eq!(ids.allocate(), Some(ElementId(u64::MAX - 1)));
        assert_eq!(ids.allocate(), None);
        assert_eq!(ids.next_fresh(), u64::MAX);

        ids.release(ElementId(u64::MAX - 1));
        assert_eq!(ids.allocate(), Some(ElementId(u64::MAX - 1)));

        let mut factory = ElementFactory::with_default_catalog();
        factory.set_allocator(IdentityAllocator::restore(u64::MAX, [], []).expect("in range"));
        assert!(factory.construct(ElementType::And).is_none());
    }

    #[test]
    fn unregistered_type_consumes_no_identity() {
        let mut factory = ElementFactory::with_default_catalog();
        let first = factory.construct(ElementType::And).expect("And is registered");
        assert!(factory.release(first.id()));

        let fresh_before = factory.allocator().next_fresh();
        let queued_before = factory.allocator().recycled().len();
        assert!(factory.construct(ElementType::Display).is_none());
        assert!(factory.construct(ElementType::Unknown).is_none());
        assert_eq!(factory.allocator().next_fresh(), fresh_before);
        assert_eq!(factory.allocator().recycled().len(), queued_before);
    }

    #[test]
    fn construct_assigns_identities_through_the_allocator() {
        let mut factory = ElementFactory::with_default_catalog();
        let button = factory
            .construct(ElementType::Button)
            .expect("Button is registered");
        let led = factory.construct(ElementType::Led).expect("Led is registered");
        assert_eq!(button.id(), ElementId(0));
        assert_eq!(led.id(), ElementId(1));
        assert_eq!(button.group(), ElementGroup::Input);
        assert!(led.capabilities().has_color);
    }

    #[test]
    fn registry_can_grow() {
        let mut factory = ElementFactory::new();
        assert!(factory.construct(ElementType::Mux).is_none());
        factory.register(ElementType::Mux, || {
            Element::new(
                ElementType::Mux,
                ElementGroup::Mux,
                Capabilities::ports((3, 3), (1, 1)),
            )
        });
        let mux = factory.construct(ElementType::Mux).expect("Mux was registered");
        assert_eq!(mux.id(), ElementId(0));
    }

    #[test]
    fn rebuild_keeps_the_given_identity() {
        let factory = ElementFactory::with_default_catalog();
        let xor = factory
            .rebuild(ElementType::Xor, ElementId(17))
            .expect("Xor is registered");
        assert_eq!(xor.id(), ElementId(17));
        assert_eq!(factory.allocator().next_fresh(), 0);
    }
}
