pub mod client;
pub mod driver;
pub mod port;
pub mod server;
pub mod supervisor;

pub use client::{ClientController, ClientLaunch};
pub use driver::{ClientSlot, IterationReport, WorkloadDriver};
pub use port::unused_local_port;
pub use server::ServerController;
pub use supervisor::ManagedProcess;
