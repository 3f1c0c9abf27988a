pub mod check;
pub mod presets;
pub mod record;
