//! Opaque world registry mutated by scheduled events.
//!
//! The renderer reads this state after each tick; the core only guarantees
//! that mutations are visible by the next render pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{InputScore, InputType};

/// Number of block slots in a row.
pub const ROW_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Row {
    A,
    Dpad,
}

impl Row {
    /// Input lane the pistons in this row respond to.
    pub fn lane(self) -> InputType {
        match self {
            Row::A => InputType::A,
            Row::Dpad => InputType::Dpad,
        }
    }

    pub fn piston_type(self) -> BlockType {
        match self {
            Row::A => BlockType::PistonA,
            Row::Dpad => BlockType::PistonDpad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    Platform,
    PistonA,
    PistonDpad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    RowBlock {
        row: Row,
        index: usize,
        block_type: BlockType,
        extended: bool,
    },
    Rod {
        row: Row,
        deployed_beat: f64,
    },
    DunkRod {
        deployed_beat: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque")]
    pub a: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn lerp(&self, other: &Color, alpha: f32) -> Color {
        let t = alpha.clamp(0.0, 1.0);
        if t >= 1.0 {
            return *other;
        }
        Color {
            r: self.r + (other.r - self.r) * t,
            g: self.g + (other.g - self.g) * t,
            b: self.b + (other.b - self.b) * t,
            a: self.a + (other.a - self.a) * t,
        }
    }
}

/// Colours applied to the tileset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetPalette {
    pub background: Color,
    pub cube_face: Color,
    pub piston_a: Color,
    pub piston_dpad: Color,
}

impl Default for TilesetPalette {
    fn default() -> Self {
        Self {
            background: Color::rgb(0.0, 0.0, 0.0),
            cube_face: Color::rgb(0.16, 0.63, 0.47),
            piston_a: Color::rgb(0.99, 0.16, 0.16),
            piston_dpad: Color::rgb(0.16, 0.33, 0.99),
        }
    }
}

impl TilesetPalette {
    /// Palette of the dunk side mode.
    pub fn gba() -> Self {
        Self {
            background: Color::rgb(0.97, 0.97, 0.88),
            cube_face: Color::rgb(0.55, 0.68, 0.06),
            piston_a: Color::rgb(0.19, 0.38, 0.19),
            piston_dpad: Color::rgb(0.06, 0.22, 0.06),
        }
    }

    pub fn lerp(&self, other: &TilesetPalette, alpha: f32) -> TilesetPalette {
        TilesetPalette {
            background: self.background.lerp(&other.background, alpha),
            cube_face: self.cube_face.lerp(&other.cube_face, alpha),
            piston_a: self.piston_a.lerp(&other.piston_a, alpha),
            piston_dpad: self.piston_dpad.lerp(&other.piston_dpad, alpha),
        }
    }
}

/// Feedback cue produced after a judgement, consumed by the renderer and the
/// sound effects layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cue {
    pub beat: f64,
    pub lane: InputType,
    pub score: InputScore,
}

#[derive(Debug, Clone)]
pub struct World {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
    pub palette: TilesetPalette,
    pub music_volume: f32,
    cues: Vec<Cue>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 0,
            palette: TilesetPalette::default(),
            music_volume: 1.0,
            cues: Vec::new(),
        }
    }

    pub fn add_entity(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.insert(id, entity);
        id
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter().map(|(id, entity)| (*id, entity))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn block_at(&self, row: Row, index: usize) -> Option<&Entity> {
        self.entities.values().find(|entity| {
            matches!(entity, Entity::RowBlock { row: r, index: i, .. } if *r == row && *i == index)
        })
    }

    /// Places a block, replacing whatever occupied the slot. With
    /// `affect_this_index_and_forward` every following slot is cleared first.
    pub fn spawn_block(
        &mut self,
        row: Row,
        index: usize,
        block_type: BlockType,
        affect_this_index_and_forward: bool,
    ) -> EntityId {
        self.entities.retain(|_, entity| match entity {
            Entity::RowBlock { row: r, index: i, .. } if *r == row => {
                if affect_this_index_and_forward {
                    *i < index
                } else {
                    *i != index
                }
            }
            _ => true,
        });
        self.add_entity(Entity::RowBlock {
            row,
            index,
            block_type,
            extended: false,
        })
    }

    /// Extends (or retracts) the piston at `index`, or every piston in the row
    /// when `index` is `None`. Returns how many pistons changed.
    pub fn set_extended(&mut self, row: Row, index: Option<usize>, extended: bool) -> usize {
        let mut changed = 0;
        for entity in self.entities.values_mut() {
            if let Entity::RowBlock {
                row: r,
                index: i,
                block_type,
                extended: state,
            } = entity
            {
                let targeted = *r == row && index.map_or(true, |wanted| wanted == *i);
                if targeted && *block_type != BlockType::Platform && *state != extended {
                    *state = extended;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn despawn_blocks(&mut self, row: Row, index: Option<usize>) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, entity| {
            !matches!(entity, Entity::RowBlock { row: r, index: i, .. }
                if *r == row && index.map_or(true, |wanted| wanted == *i))
        });
        before - self.entities.len()
    }

    pub fn pistons(&self, row: Row) -> impl Iterator<Item = usize> + '_ {
        let wanted = row.piston_type();
        self.entities.values().filter_map(move |entity| match entity {
            Entity::RowBlock {
                row: r,
                index,
                block_type,
                ..
            } if *r == row && *block_type == wanted => Some(*index),
            _ => None,
        })
    }

    pub fn push_cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }

    pub fn drain_cues(&mut self) -> Vec<Cue> {
        std::mem::take(&mut self.cues)
    }
}
