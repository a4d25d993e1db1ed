//! Snow-family consensus.
//!
//! This crate decides blocks, vertices and transactions by repeatedly
//! polling weighted samples of validators.
//!
//! # Architecture
//!
//! - **Parameters**: validated quorum and resource bounds, with named presets
//! - **Validators**: weighted validator sets per subnet and stake-weighted sampling
//! - **Snowball**: the binary and n-ary decision cells
//! - **Polls**: aggregation of weighted chits into finished tallies
//! - **Snowman**: linear chain consensus built on Snowball
//! - **Avalanche**: DAG consensus with conflict sets and a stop vertex
//! - **Acceptors**: fan-out of accepted containers to subscribers
//! - **Engine**: state machine driving one consensus instance
//!
//! # Example
//!
//! ```
//! use snow_consensus::{Binary, Parameters};
//!
//! let params = Parameters::local();
//! let mut cell = Binary::new(&params, 0);
//! for _ in 0..params.beta {
//!     cell.record_poll([4, 1]).unwrap();
//! }
//! assert!(cell.finalized());
//! assert_eq!(cell.preference(), 0);
//! ```

pub mod acceptor;
pub mod config;
pub mod consensus;
pub mod engine;
mod error;
mod parameters;
pub mod poll;
pub mod validators;

pub use acceptor::{Acceptor, AcceptorGroup};
pub use config::{ConfigError, ConsensusConfig, ParameterOverrides};
pub use consensus::avalanche::{Avalanche, Tx, Vertex};
pub use consensus::snowball::{Binary, Confidence, Nnary};
pub use consensus::snowman::{Block, Snowman};
pub use consensus::{Consensus, Context, Decidable, Health, Status};
pub use engine::{run_repoller, Engine, EngineConfig, EngineState, Message, Sender};
pub use error::{ConsensusError, Result};
pub use parameters::{ParameterError, Parameters};
pub use poll::{EarlyTermFactory, NoEarlyTermFactory, Poll, PollFactory};
pub use validators::{Manager, SetCallbackListener, Validator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_default() {
        let params = Parameters::default();
        assert!(params.k > 0);
        assert!(params.alpha_preference * 2 > params.k);
        assert!(params.alpha_preference <= params.alpha_confidence);
        assert!(params.alpha_confidence <= params.k);
    }
}
