//! Backend services behind the non-PTY message kinds
//!
//! Tag allocation, clipboard, themes and bulk file storage.

mod bulk_file;
mod clipboard;
mod tags;
mod themes;

pub use bulk_file::*;
pub use clipboard::*;
pub use tags::*;
pub use themes::*;
