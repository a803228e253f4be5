pub mod advertisement;
pub mod application;
pub mod commission;
pub mod ledger;
pub mod membership;
pub mod money;
pub mod notification;
pub mod order;
pub mod payout;
pub mod plan;
pub mod user;

pub use advertisement::*;
pub use application::*;
pub use commission::*;
pub use ledger::*;
pub use membership::*;
pub use money::*;
pub use notification::*;
pub use order::*;
pub use payout::*;
pub use plan::*;
pub use user::*;
