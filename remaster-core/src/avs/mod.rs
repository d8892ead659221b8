pub mod plugins;
pub mod script_builder;
