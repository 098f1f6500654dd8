// cl_clip.rs -- client-side collision view: the world plus the solid entities
// from the latest snapshot

use std::sync::Arc;

use pmcore_common::cmodel::CollisionModel;
use pmcore_common::pmove::PmoveCallbacks;
use pmcore_common::q_shared::{Trace, Vec3, CONTENTS_MONSTER, MASK_PLAYERSOLID, VEC3_ORIGIN};

/// Encoded solid value for entities that use an inline brush model.
pub const SOLID_BMODEL: i32 = 31;

/// How an entity takes part in collision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntitySolid {
    /// Axis-aligned box. Boxes never rotate.
    Box { mins: Vec3, maxs: Vec3 },
    /// Inline brush model `*N` of the world model.
    Brush { submodel: usize },
}

impl EntitySolid {
    /// Unpacks the network `solid` field. 0 is not solid, 31 is a brush
    /// model, anything else is a packed box size.
    pub fn from_encoded(solid: i32, modelindex: usize) -> Option<Self> {
        match solid {
            0 => None,
            SOLID_BMODEL => Some(EntitySolid::Brush {
                submodel: modelindex,
            }),
            _ => {
                let x = (8 * (solid & 31)) as f32;
                let zd = (8 * ((solid >> 5) & 31)) as f32;
                let zu = (8 * ((solid >> 10) & 63) - 32) as f32;
                Some(EntitySolid::Box {
                    mins: [-x, -x, -zd],
                    maxs: [x, x, zu],
                })
            }
        }
    }
}

/// One solid entity from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientEntity {
    pub number: i32,
    pub origin: Vec3,
    pub angles: Vec3,
    pub solid: EntitySolid,
}

/// An entity ready for tracing.
#[derive(Debug, Clone)]
enum ClipShape {
    Hull(CollisionModel),
    Inline { headnode: i32 },
}

#[derive(Debug, Clone)]
struct ClipEntity {
    number: i32,
    origin: Vec3,
    angles: Vec3,
    shape: ClipShape,
}

/// Traces against the world model and every solid entity except the local
/// player.
#[derive(Debug, Clone)]
pub struct ClientWorld {
    model: Arc<CollisionModel>,
    entities: Vec<ClipEntity>,
    playernum: i32,
    mask: i32,
}

impl ClientWorld {
    pub fn new(model: Arc<CollisionModel>) -> Self {
        Self {
            model,
            entities: Vec::new(),
            playernum: -1,
            mask: MASK_PLAYERSOLID,
        }
    }

    pub fn model(&self) -> &Arc<CollisionModel> {
        &self.model
    }

    /// Entity number of the local player, whose own entity is never clipped
    /// against.
    pub fn set_playernum(&mut self, number: i32) {
        self.playernum = number;
    }

    /// Replaces the solid entity list with the one from a new snapshot.
    /// Brush entities naming a sub-model the world does not have are skipped.
    pub fn set_entities(&mut self, entities: &[ClientEntity]) {
        self.entities.clear();
        for ent in entities {
            let shape = match ent.solid {
                EntitySolid::Box { mins, maxs } => {
                    ClipShape::Hull(CollisionModel::box_hull(&mins, &maxs, CONTENTS_MONSTER))
                }
                EntitySolid::Brush { submodel } => match self.model.submodel(submodel) {
                    Some(m) => ClipShape::Inline { headnode: m.headnode },
                    None => {
                        log::warn!(
                            "entity {} uses unknown inline model *{}",
                            ent.number,
                            submodel
                        );
                        continue;
                    }
                },
            };
            self.entities.push(ClipEntity {
                number: ent.number,
                origin: ent.origin,
                angles: ent.angles,
                shape,
            });
        }
    }

    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    // ============================================================
    // CL_ClipMoveToEntities
    // ============================================================

    fn clip_move_to_entities(
        &self,
        start: &Vec3,
        mins: &Vec3,
        maxs: &Vec3,
        end: &Vec3,
        tr: &mut Trace,
    ) {
        for ent in &self.entities {
            if ent.number == self.playernum {
                continue;
            }

            if tr.allsolid {
                return;
            }

            let trace = match &ent.shape {
                ClipShape::Hull(hull) => hull.transformed_box_trace(
                    start,
                    end,
                    mins,
                    maxs,
                    hull.world_headnode(),
                    self.mask,
                    &ent.origin,
                    &VEC3_ORIGIN,
                ),
                ClipShape::Inline { headnode } => self.model.transformed_box_trace(
                    start,
                    end,
                    mins,
                    maxs,
                    *headnode,
                    self.mask,
                    &ent.origin,
                    &ent.angles,
                ),
            };

            if trace.allsolid || trace.startsolid || trace.fraction < tr.fraction {
                let was_startsolid = tr.startsolid;
                *tr = trace;
                tr.startsolid |= was_startsolid;
            }
        }
    }
}

impl PmoveCallbacks for ClientWorld {
    fn trace(&self, start: &Vec3, mins: &Vec3, maxs: &Vec3, end: &Vec3) -> Trace {
        // check against world
        let mut t = self
            .model
            .box_trace(start, end, mins, maxs, self.model.world_headnode(), self.mask);

        // check all other solid models
        self.clip_move_to_entities(start, mins, maxs, end, &mut t);
        t
    }

    fn pointcontents(&self, point: &Vec3) -> i32 {
        let mut contents = self.model.point_contents(point, self.model.world_headnode());

        for ent in &self.entities {
            if let ClipShape::Inline { headnode } = ent.shape {
                contents |= self
                    .model
                    .transformed_point_contents(point, headnode, &ent.origin, &ent.angles);
            }
        }
        contents
    }
}
