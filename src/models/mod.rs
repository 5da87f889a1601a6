pub mod ping;
pub mod record;
pub mod ride;
pub mod vehicle;
