//! CLI commands.

pub(crate) mod authorize;
pub(crate) mod keys;
pub(crate) mod routes;
pub(crate) mod tokens;
