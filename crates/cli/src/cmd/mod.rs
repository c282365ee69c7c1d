mod map;
mod order;
mod tag;
mod watch;

pub use map::cmd_map;
pub use order::cmd_order;
pub use tag::cmd_tag;
pub use watch::cmd_watch;
