pub mod session;
pub mod state;
pub mod step;

pub use session::*;
pub use state::*;
pub use step::*;
