pub mod command;
pub mod session;

pub use command::{parse, Command, ParseError};
pub use session::{ConsoleSession, Flow};
