//! Config loading and schema.

mod load;
mod schema;

pub use load::{CONFIG_PATH_ENV, apply_env_overrides, load, load_from, load_or_default};
pub use schema::Config;
