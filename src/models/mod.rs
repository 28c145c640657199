mod callback;
mod preference;
mod sample;
mod work_task;

pub use callback::{CallbackInfo, CallbackReference};
pub use preference::Preference;
pub use sample::{ForegroundSample, UsageRecord};
pub use work_task::WorkTask;
