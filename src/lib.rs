pub mod channel;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod error;
pub mod expiry;
pub mod model;
pub mod reconstructor;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod testing;
pub mod vault;
pub mod writer;

pub mod prelude {
    pub use crate::channel::{Channel, DiscordClient};
    pub use crate::config::VaultConfig;
    pub use crate::error::Result;
    pub use crate::model::{ModerationState, PunishmentKind, PunishmentRecord, Warning};
    pub use crate::store::StateStore;
    pub use crate::vault::Vault;
}
