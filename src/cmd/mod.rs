//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`                                            |
//! | `init`          | `Init`                                             |
//! | `invite`        | `Invite`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod init;
pub mod invite;
pub mod serve;

pub use config::cmd_config;
pub use init::cmd_init;
pub use invite::cmd_invite;
pub use serve::{ServeOverrides, cmd_serve};
