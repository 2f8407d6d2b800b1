mod command;
mod output;
mod sandbox;
mod spawner;
mod traits;

pub use command::CommandService;
pub use output::ExecutionOutput;
pub use sandbox::ProcessSandbox;
pub use spawner::ProcessSpawner;
pub use traits::{CommandConfig, ExecutionSandbox, GenerationService, ServiceError};
