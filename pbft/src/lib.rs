pub mod message;
pub mod node;
pub mod state;

pub use message::{digest, tag, Hash, PbftKind, PbftMessage, PbftOutbound, Sequence, View};
pub use node::PbftNode;
pub use state::{Executed, PbftConfig, PbftError, SUSPICION_THRESHOLD};
