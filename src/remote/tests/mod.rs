//! Unit tests for the remote channel.

mod util;
