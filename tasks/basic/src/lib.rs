//! Basic task implementations: constants, arithmetic, branching,
//! and streaming text plumbing.

use std::sync::Arc;

use gantry_flow::base::{RegisterTaskError, TaskDispatcher};

mod constant;
mod math;
mod sleep;
mod switch;
mod text;

pub use constant::Constant;
pub use math::{Math, Sum};
pub use sleep::Sleep;
pub use switch::Switch;
pub use text::{TextPipe, TextSource};

/// Register all tasks in this crate into the given dispatcher.
pub fn register(dispatcher: &mut TaskDispatcher) -> Result<(), RegisterTaskError> {
	dispatcher.register_task("Constant", |_id, config| {
		Ok(Arc::new(constant::Constant::new(config)?))
	})?;

	dispatcher.register_task("Math", |_id, config| Ok(Arc::new(math::Math::new(config)?)))?;
	dispatcher.register_task("Sum", |_id, _config| Ok(Arc::new(math::Sum::new())))?;

	dispatcher.register_task("Switch", |_id, config| {
		Ok(Arc::new(switch::Switch::new(config)?))
	})?;

	dispatcher.register_task("Sleep", |_id, config| Ok(Arc::new(sleep::Sleep::new(config)?)))?;

	dispatcher.register_task("TextSource", |_id, config| {
		Ok(Arc::new(text::TextSource::new(config)?))
	})?;
	dispatcher.register_task("TextPipe", |_id, _config| Ok(Arc::new(text::TextPipe::new())))?;

	return Ok(());
}
