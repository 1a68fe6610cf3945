//! Entity/component system (minimal ECS).
//!
//! This is a deliberately small ECS suitable for a fixed-step simulation and
//! net replication. It is not archetype-based; instead it uses typed component
//! tables keyed by entity id. Field-less markers are stored as plain id sets.
//!
//! All iteration is in ascending entity id order so systems that walk the
//! world behave the same on every run.

use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, BTreeSet, HashMap},
    marker::PhantomData,
};

use serde::{Deserialize, Serialize};

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// A component without fields. Presence is the whole payload.
pub trait Marker: 'static + Send + Sync {}

/// Type-erased view over a table or marker set.
trait Storage: Send + Sync {
    fn contains(&self, entity: EntityId) -> bool;
    fn remove_entity(&mut self, entity: EntityId) -> bool;
    fn len(&self) -> usize;
    fn entities(&self) -> Vec<EntityId>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Table<T> {
    rows: BTreeMap<EntityId, T>,
}

impl<T: 'static + Send + Sync> Storage for Table<T> {
    fn contains(&self, entity: EntityId) -> bool {
        self.rows.contains_key(&entity)
    }

    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.rows.remove(&entity).is_some()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn entities(&self) -> Vec<EntityId> {
        self.rows.keys().copied().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct MarkerSet<M> {
    members: BTreeSet<EntityId>,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Marker> Storage for MarkerSet<M> {
    fn contains(&self, entity: EntityId) -> bool {
        self.members.contains(&entity)
    }

    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.members.remove(&entity)
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn entities(&self) -> Vec<EntityId> {
        self.members.iter().copied().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Simple world that can store typed components and markers.
#[derive(Default)]
pub struct World {
    next_id: u64,
    alive: BTreeSet<EntityId>,
    storages: HashMap<TypeId, Box<dyn Storage>>,
}

impl World {
    /// Creates a new entity. Ids are never handed out twice.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.alive.insert(id);
        id
    }

    /// Registers an id allocated elsewhere (e.g. by a remote authority).
    ///
    /// Later `spawn` calls will not collide with it.
    pub fn adopt(&mut self, entity: EntityId) {
        self.alive.insert(entity);
        self.next_id = self.next_id.max(entity.0 + 1);
    }

    /// Removes an entity from every table and marker set.
    ///
    /// Returns `false` if the entity was not alive.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.alive.remove(&entity) {
            return false;
        }
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.alive.contains(&entity)
    }

    /// Live entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.alive.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }

    /// Inserts/replaces a component for a live entity.
    ///
    /// Returns `false` (and stores nothing) when the entity is not alive.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.table_mut::<T>().rows.insert(entity, component);
        true
    }

    /// Removes a component, returning it if it was present.
    pub fn remove<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<Table<T>>())
            .and_then(|table| table.rows.remove(&entity))
    }

    /// Whether the entity has the component or marker `T`.
    pub fn has<T: 'static>(&self, entity: EntityId) -> bool {
        self.storages
            .get(&TypeId::of::<T>())
            .is_some_and(|storage| storage.contains(entity))
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.table::<T>().and_then(|table| table.rows.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<Table<T>>())
            .and_then(|table| table.rows.get_mut(&entity))
    }

    /// Iterates entities with a given component.
    pub fn iter<T: 'static + Send + Sync>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.table::<T>()
            .into_iter()
            .flat_map(|table| table.rows.iter().map(|(k, v)| (*k, v)))
    }

    /// Attaches a marker. Returns `true` if it was newly attached.
    pub fn mark<M: Marker>(&mut self, entity: EntityId) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let storage = self
            .storages
            .entry(TypeId::of::<M>())
            .or_insert_with(|| {
                Box::new(MarkerSet::<M> {
                    members: BTreeSet::new(),
                    _marker: PhantomData,
                })
            });
        let set = storage
            .as_any_mut()
            .downcast_mut::<MarkerSet<M>>()
            .expect("storage type mismatch");
        set.members.insert(entity)
    }

    /// Detaches a marker. Returns `true` if it was present.
    pub fn unmark<M: Marker>(&mut self, entity: EntityId) -> bool {
        self.storages
            .get_mut(&TypeId::of::<M>())
            .is_some_and(|storage| storage.remove_entity(entity))
    }

    /// Iterates entities carrying marker `M`.
    pub fn marked<M: Marker>(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.storages
            .get(&TypeId::of::<M>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<MarkerSet<M>>())
            .into_iter()
            .flat_map(|set| set.members.iter().copied())
    }

    /// Entities that currently have component or marker `T`.
    pub fn with<T: 'static>(&self) -> Vec<EntityId> {
        self.storages
            .get(&TypeId::of::<T>())
            .map(|storage| storage.entities())
            .unwrap_or_default()
    }

    /// Runs a query, returning matching entities in ascending id order.
    pub fn query(&self, query: &Query) -> Vec<EntityId> {
        let candidates = if query.with.is_empty() {
            self.alive.iter().copied().collect()
        } else {
            // Drive the scan from the smallest required storage.
            let mut smallest: Option<&dyn Storage> = None;
            for type_id in &query.with {
                let Some(storage) = self.storages.get(type_id) else {
                    return Vec::new();
                };
                if smallest.map_or(true, |s| storage.len() < s.len()) {
                    smallest = Some(storage.as_ref());
                }
            }
            smallest.map(|s| s.entities()).unwrap_or_default()
        };

        candidates
            .into_iter()
            .filter(|entity| query.matches(self, *entity))
            .collect()
    }

    fn contains_type(&self, type_id: &TypeId, entity: EntityId) -> bool {
        self.storages
            .get(type_id)
            .is_some_and(|storage| storage.contains(entity))
    }

    fn table<T: 'static + Send + Sync>(&self) -> Option<&Table<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<Table<T>>())
    }

    fn table_mut<T: 'static + Send + Sync>(&mut self) -> &mut Table<T> {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                Box::new(Table::<T> {
                    rows: BTreeMap::new(),
                })
            });

        storage
            .as_any_mut()
            .downcast_mut::<Table<T>>()
            .expect("storage type mismatch")
    }
}

/// A conjunction of required and excluded tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    with: Vec<TypeId>,
    without: Vec<TypeId>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires component or marker `T`.
    pub fn with<T: 'static>(mut self) -> Self {
        self.with.push(TypeId::of::<T>());
        self
    }

    /// Excludes entities carrying component or marker `T`.
    pub fn without<T: 'static>(mut self) -> Self {
        self.without.push(TypeId::of::<T>());
        self
    }

    pub fn matches(&self, world: &World, entity: EntityId) -> bool {
        world.is_alive(entity)
            && self.with.iter().all(|t| world.contains_type(t, entity))
            && !self.without.iter().any(|t| world.contains_type(t, entity))
    }
}

/// Entities that started/stopped matching since the previous update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDelta {
    pub entered: Vec<EntityId>,
    pub exited: Vec<EntityId>,
}

/// A query that remembers its previous result set.
///
/// An entity that appears and disappears between two updates is never
/// reported at all.
#[derive(Debug, Clone)]
pub struct TrackedQuery {
    query: Query,
    matched: BTreeSet<EntityId>,
}

impl TrackedQuery {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            matched: BTreeSet::new(),
        }
    }

    /// Re-evaluates the query and reports the transitions.
    pub fn update(&mut self, world: &World) -> QueryDelta {
        let current: BTreeSet<EntityId> = world.query(&self.query).into_iter().collect();
        let entered = current.difference(&self.matched).copied().collect();
        let exited = self.matched.difference(&current).copied().collect();
        self.matched = current;
        QueryDelta { entered, exited }
    }

    /// Entities matching as of the last update.
    pub fn matched(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.matched.iter().copied()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.matched.contains(&entity)
    }

    pub fn query(&self) -> &Query {
        &self.query
    }
}
