//! Transaction decoration: turns raw calls and logs into typed, taggable records.
//!
//! Method decorators decode call input, event decorators decode logs for the
//! tracked address, and transaction decorators classify the result. All three are
//! registries on [`DecorationManager`]; new protocols plug in without touching it.

pub mod abi;
pub mod decoration;
pub mod decorators;
pub mod event;
pub mod manager;
pub mod method;
pub mod tags;

pub use decoration::{
    DecorationInput, FullTransaction, SwapAmount, TransactionDecoration, TransactionDecorator,
};
pub use event::{ContractEventInstance, EventDecorator};
pub use manager::DecorationManager;
pub use method::{ContractMethod, MethodDecorator, SwapMethod, SwapTrade, Token};
pub use tags::TagGenerator;
