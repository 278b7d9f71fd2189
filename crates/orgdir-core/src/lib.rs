//! Organization directory core: domain models, the error taxonomy and the
//! repository traits that storage backends implement.

pub mod error;
pub mod models;
pub mod repository;
