pub mod command;
pub mod control;
pub mod dump;

pub use command::{ClientCommand, ServerCommand};
pub use dump::{parse_station_dump, render_station_dump};
