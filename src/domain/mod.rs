//! CRM tool catalog exposed over the Model Context Protocol
//!
//! Handler groups for leads, contacts, deals, and sequences, and the static
//! registration table that maps tool names onto them.

pub mod contacts;
pub mod deals;
pub mod leads;
pub mod mock;
pub mod registry;
pub mod sequences;
pub mod utils;
