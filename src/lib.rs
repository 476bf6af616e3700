//! Walking catchment areas of daycare centres.
//!
//! Three batch stages share the geometry helpers in this crate:
//! [`isochrone`] fetches walking isochrones from a routing service with
//! resume support, [`extract`] pulls green and water areas out of an
//! OpenStreetMap extract, and [`overlap`] turns the isochrones into a
//! non-overlapping collection. [`pipeline`] chains them.

pub mod cache;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod isochrone;
pub mod osm;
pub mod osm_reader;
pub mod overlap;
pub mod pipeline;
pub mod points;
pub mod progress;
pub mod rate_limit;
pub mod routing;
pub mod utils;

#[cfg(feature = "python")]
mod python;

pub use error::{Error, Result};
