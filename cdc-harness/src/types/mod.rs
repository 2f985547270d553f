//! Domain types shared by the generator, the collaborator clients and the measurement code.
//!
//! Includes the logical tables with their declared schema, generated rows with typed values,
//! and the row filters used to observe and delete harness rows on either side.

mod filter;
mod row;
mod schema;
mod table;

pub use filter::*;
pub use row::*;
pub use schema::*;
pub use table::*;
