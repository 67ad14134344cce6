pub(crate) mod async_task;
pub(crate) mod id_worker;
pub(crate) mod net;
pub(crate) mod scheduler;
pub(crate) mod time;

pub use id_worker::IdGenerator;
pub use scheduler::Scheduler;
pub use scheduler::TimerHandle;
