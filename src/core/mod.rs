/// UI-independent bookkeeping shared by every front end.
///
/// The registry keeps the ordered list of configured ports so a CLI, a
/// service wrapper, or any future front end manage sessions the same way.
pub mod registry;

pub use registry::SessionRegistry;
