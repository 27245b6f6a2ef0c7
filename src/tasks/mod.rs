pub mod control;
pub mod sensor;
