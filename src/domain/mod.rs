pub mod enums;
pub mod instance;
pub mod template;
pub mod views;

pub use enums::{InstanceStatus, Priority, Segment};
pub use instance::{format_countdown, instance_id, StateEvent, TaskInstance};
pub use template::{derive_template_id, TaskTemplate, DEFAULT_DURATION_MINUTES, DEFAULT_SNOOZE_MINUTES};
pub use views::{status_badge, ActiveView, CatchUpItemView, CatchUpView, EngineSnapshot, PlanRowView};
