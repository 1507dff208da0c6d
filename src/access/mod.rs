//! Access control: weighted roles and named allow-policies.

mod policy;
mod role;

pub use policy::{Policy, PolicyRegistry};
pub use role::{Role, RoleRegistry, GLOBAL_SCOPE};
