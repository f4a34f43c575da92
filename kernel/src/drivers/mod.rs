//! PS/2 input drivers. Both feed the UI server's event queue directly from
//! IRQ context; neither buffers input
//! itself, since `graphics::events` already owns a bounded per-responder
//! pipe for that.

pub mod keyboard;
pub mod mouse;
