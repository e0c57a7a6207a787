pub mod engine;
pub mod rec;
pub mod vu;

pub use engine::{ExecutionEngine, RecordingEngine};
pub use rec::RecMicroVu;
pub use vu::{Unit, VuContext, VuRegs};
