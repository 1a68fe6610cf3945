//! Event queues.
//!
//! A small typed event bus. Producers push during a tick, a consumer drains
//! each type once. The physics adapter pushes [`ContactEvent`]s after every
//! step and the gameplay pass drains them.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::{ecs::EntityId, math::Vec3};

/// A contact that started between two entities during the last step.
///
/// `normal` is a unit vector pointing out of `other` towards `entity`: for
/// a player standing on the floor it points up. Each started contact is
/// queued twice, once from each side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEvent {
    pub entity: EntityId,
    pub other: EntityId,
    pub normal: Vec3,
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        self.queue_mut::<E>().push(e);
    }

    /// Pushes several events, keeping their order.
    pub fn extend<E: 'static + Send + Sync>(&mut self, events: impl IntoIterator<Item = E>) {
        self.queue_mut::<E>().extend(events);
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    /// Drops every queued event of every type.
    pub fn clear(&mut self) {
        self.queues.clear();
    }

    fn queue_mut<E: 'static + Send + Sync>(&mut self) -> &mut Vec<E> {
        self.queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()))
            .downcast_mut::<Vec<E>>()
            .expect("queue type mismatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_events_in_push_order_once() {
        let mut bus = EventBus::default();
        let a = ContactEvent {
            entity: EntityId(1),
            other: EntityId(2),
            normal: Vec3::UP,
        };
        let b = ContactEvent {
            entity: EntityId(2),
            other: EntityId(1),
            normal: -Vec3::UP,
        };
        bus.push(a);
        bus.extend([b]);
        assert_eq!(bus.pending::<ContactEvent>(), 2);

        assert_eq!(bus.drain::<ContactEvent>(), vec![a, b]);
        assert!(bus.drain::<ContactEvent>().is_empty());
    }

    #[test]
    fn queues_are_separated_by_type() {
        let mut bus = EventBus::default();
        bus.push(5u32);
        assert_eq!(bus.pending::<ContactEvent>(), 0);
        assert_eq!(bus.drain::<u32>(), vec![5]);
    }
}
