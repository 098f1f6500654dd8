#![allow(clippy::too_many_arguments, clippy::float_cmp)]
// Client side of movement: collision against snapshot entities and prediction
pub mod cl_clip;
pub mod cl_pred;
