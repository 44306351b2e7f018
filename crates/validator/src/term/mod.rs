pub(crate) mod clock;
pub(crate) mod state;

pub use clock::{ClockError, Phase, TermClock, TermTick};
pub use state::{TermState, TermSummary};
