pub mod invalidator;
pub mod poll_ender;
