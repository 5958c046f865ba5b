pub mod backup;
pub mod inspect_block;
pub mod query;
pub mod sync;
