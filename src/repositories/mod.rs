pub(crate) mod bills;
pub(crate) mod breaker;
pub(crate) mod claims;
pub mod store;
