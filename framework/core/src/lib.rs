mod shutdown;

pub mod protocol;
pub mod results;
pub mod stage;

pub mod prelude {
    pub use crate::protocol;
    pub use crate::results;
    pub use crate::shutdown::{ShutdownHandle, ShutdownListener};
    pub use crate::stage::{default_stages, Stage};
}
