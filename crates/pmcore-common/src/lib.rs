#![allow(clippy::too_many_arguments, clippy::needless_range_loop, clippy::float_cmp,
         clippy::manual_range_contains, clippy::collapsible_else_if)]

pub mod q_shared;
pub mod pm_config;
pub mod cmodel;
pub mod stuck;
pub mod pmove;
