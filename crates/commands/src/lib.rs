//! Typed command surface shared by the editor UI and the command-line front end.
//! （編輯器介面與命令列共用的型別化指令介面。）

mod command;
mod error;
mod session;

pub use command::{Command, Response};
pub use error::CommandError;
pub use incipit_compile::ErrorKind;
pub use session::Session;
