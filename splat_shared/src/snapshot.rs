//! World snapshot codec.
//!
//! A snapshot is a mapping `table id -> entity id -> record`, restricted to the
//! tables registered with a [`SnapshotCodec`]. The server encodes the full set
//! every tick; receivers apply it to a local mirror [`World`].
//!
//! Wire shape (JSON):
//! ```text
//! { "version": 1, "tick": 120,
//!   "tables": { "Position": { "3": { "x": 0.0, "y": 1.2, "z": 4.0 } },
//!               "DebugCollider": { "3": {} } } }
//! ```
//!
//! Applying is idempotent: every listed entity's record is replaced in full.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    components::{
        Color, DebugCollider, ModelRef, Owner, PhysicsBody, Player, Position, Projectile, Rotation,
        Shape,
    },
    ecs::{EntityId, Marker, World},
};

/// Bumped whenever the synchronized table list or a record layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Rows of one table, keyed by raw entity id.
pub type TableRows = BTreeMap<u64, Value>;

/// A component that is replicated under a stable table id.
pub trait Synced: Serialize + DeserializeOwned + 'static + Send + Sync {
    const TABLE: &'static str;
}

/// A marker that is replicated under a stable table id.
pub trait SyncedMarker: Marker {
    const TABLE: &'static str;
}

impl Synced for Position {
    const TABLE: &'static str = "Position";
}

impl Synced for Rotation {
    const TABLE: &'static str = "Rotation";
}

impl Synced for Shape {
    const TABLE: &'static str = "Shape";
}

impl Synced for PhysicsBody {
    const TABLE: &'static str = "PhysicsBody";
}

impl Synced for Color {
    const TABLE: &'static str = "Color";
}

impl Synced for ModelRef {
    const TABLE: &'static str = "Model";
}

impl Synced for Player {
    const TABLE: &'static str = "Player";
}

impl Synced for Projectile {
    const TABLE: &'static str = "Projectile";
}

impl SyncedMarker for DebugCollider {
    const TABLE: &'static str = "DebugCollider";
}

impl SyncedMarker for Owner {
    const TABLE: &'static str = "Owner";
}

/// Full serialized copy of the synchronized tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub tick: u64,
    pub tables: BTreeMap<String, TableRows>,
}

impl Snapshot {
    pub fn table(&self, name: &str) -> Option<&TableRows> {
        self.tables.get(name)
    }

    /// Decodes one component row, if present.
    pub fn get<T: Synced>(&self, entity: EntityId) -> anyhow::Result<Option<T>> {
        let Some(value) = self.tables.get(T::TABLE).and_then(|rows| rows.get(&entity.0)) else {
            return Ok(None);
        };
        let component = serde_json::from_value(value.clone())
            .with_context(|| format!("decode {} row for {:?}", T::TABLE, entity))?;
        Ok(Some(component))
    }

    pub fn has_marker<M: SyncedMarker>(&self, entity: EntityId) -> bool {
        self.tables
            .get(M::TABLE)
            .is_some_and(|rows| rows.contains_key(&entity.0))
    }

    /// Every entity mentioned by any table.
    pub fn entities(&self) -> BTreeSet<EntityId> {
        self.tables
            .values()
            .flat_map(|rows| rows.keys().map(|k| EntityId(*k)))
            .collect()
    }

    /// Tags `entity` as the recipient's own entity.
    ///
    /// Only used for direct replies; the shared world never carries `Owner`.
    pub fn with_owner(mut self, entity: EntityId) -> Self {
        self.tables
            .entry(Owner::TABLE.to_string())
            .or_default()
            .insert(entity.0, Value::Object(serde_json::Map::new()));
        self
    }

    /// The entity tagged with `Owner`, if any.
    pub fn owner(&self) -> Option<EntityId> {
        self.tables
            .get(Owner::TABLE)
            .and_then(|rows| rows.keys().next())
            .map(|k| EntityId(*k))
    }
}

/// How a snapshot is merged into a mirror world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Replace listed rows; anything not listed is left untouched.
    #[default]
    Merge,
    /// Make the mirror's registered tables equal to the payload and despawn
    /// mirror entities that no payload table mentions.
    Synchronize,
}

type Staged = Box<dyn FnOnce(&mut World, ApplyMode)>;
type EncodeFn = fn(&World) -> anyhow::Result<TableRows>;
type DecodeFn = fn(&TableRows) -> anyhow::Result<Staged>;

struct TableCodec {
    name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Encoder/decoder over a fixed list of tables.
pub struct SnapshotCodec {
    tables: Vec<TableCodec>,
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::synchronized()
    }
}

impl SnapshotCodec {
    /// A codec with no tables.
    pub fn empty() -> Self {
        Self { tables: Vec::new() }
    }

    /// The replicated table list for [`SNAPSHOT_VERSION`].
    ///
    /// `Static` and `PendingImpulse` are server-only and never leave the process.
    pub fn synchronized() -> Self {
        Self::empty()
            .component::<Position>()
            .component::<Rotation>()
            .component::<Shape>()
            .component::<PhysicsBody>()
            .component::<Color>()
            .component::<ModelRef>()
            .component::<Player>()
            .component::<Projectile>()
            .marker::<DebugCollider>()
            .marker::<Owner>()
    }

    pub fn component<T: Synced>(mut self) -> Self {
        self.tables.push(TableCodec {
            name: T::TABLE,
            encode: encode_component::<T>,
            decode: decode_component::<T>,
        });
        self
    }

    pub fn marker<M: SyncedMarker>(mut self) -> Self {
        self.tables.push(TableCodec {
            name: M::TABLE,
            encode: encode_marker::<M>,
            decode: decode_marker::<M>,
        });
        self
    }

    pub fn table_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.iter().map(|t| t.name)
    }

    /// Encodes every registered table. Empty tables are omitted.
    pub fn encode(&self, world: &World, tick: u64) -> anyhow::Result<Snapshot> {
        let mut tables = BTreeMap::new();
        for codec in &self.tables {
            let rows = (codec.encode)(world)?;
            if !rows.is_empty() {
                tables.insert(codec.name.to_string(), rows);
            }
        }
        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            tick,
            tables,
        })
    }

    /// Applies a snapshot to `world`.
    ///
    /// Every row is decoded before anything is written, so a malformed
    /// payload leaves the world untouched.
    pub fn apply(
        &self,
        world: &mut World,
        snapshot: &Snapshot,
        mode: ApplyMode,
    ) -> anyhow::Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            bail!(
                "snapshot version {} does not match codec version {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }

        for name in snapshot.tables.keys() {
            if !self.tables.iter().any(|t| t.name == name) {
                debug!(table = %name, "Ignoring unknown snapshot table");
            }
        }

        let empty = TableRows::new();
        let mut staged = Vec::with_capacity(self.tables.len());
        let mut mentioned = BTreeSet::new();
        for codec in &self.tables {
            let rows = snapshot.tables.get(codec.name).unwrap_or(&empty);
            mentioned.extend(rows.keys().map(|k| EntityId(*k)));
            staged.push((codec.decode)(rows)?);
        }

        if mode == ApplyMode::Synchronize {
            let stale: Vec<EntityId> = world
                .entities()
                .filter(|e| !mentioned.contains(e))
                .collect();
            for entity in stale {
                world.despawn(entity);
            }
        }

        for entity in &mentioned {
            world.adopt(*entity);
        }

        for stage in staged {
            stage(world, mode);
        }
        Ok(())
    }
}

fn encode_component<T: Synced>(world: &World) -> anyhow::Result<TableRows> {
    world
        .iter::<T>()
        .map(|(entity, component)| {
            let value = serde_json::to_value(component)
                .with_context(|| format!("encode {} row for {:?}", T::TABLE, entity))?;
            Ok((entity.0, value))
        })
        .collect()
}

fn decode_component<T: Synced>(rows: &TableRows) -> anyhow::Result<Staged> {
    let decoded = rows
        .iter()
        .map(|(id, value)| {
            let component: T = serde_json::from_value(value.clone())
                .with_context(|| format!("decode {} row for entity {}", T::TABLE, id))?;
            Ok((EntityId(*id), component))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Box::new(move |world: &mut World, mode: ApplyMode| {
        if mode == ApplyMode::Synchronize {
            let listed: BTreeSet<EntityId> = decoded.iter().map(|(e, _)| *e).collect();
            for entity in world.with::<T>() {
                if !listed.contains(&entity) {
                    world.remove::<T>(entity);
                }
            }
        }
        for (entity, component) in decoded {
            world.insert(entity, component);
        }
    }))
}

fn encode_marker<M: SyncedMarker>(world: &World) -> anyhow::Result<TableRows> {
    Ok(world
        .marked::<M>()
        .map(|entity| (entity.0, Value::Object(serde_json::Map::new())))
        .collect())
}

fn decode_marker<M: SyncedMarker>(rows: &TableRows) -> anyhow::Result<Staged> {
    let listed: BTreeSet<EntityId> = rows.keys().map(|k| EntityId(*k)).collect();

    Ok(Box::new(move |world: &mut World, mode: ApplyMode| {
        if mode == ApplyMode::Synchronize {
            for entity in world.with::<M>() {
                if !listed.contains(&entity) {
                    world.unmark::<M>(entity);
                }
            }
        }
        for entity in listed {
            world.mark::<M>(entity);
        }
    }))
}
